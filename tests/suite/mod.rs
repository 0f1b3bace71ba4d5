mod end_to_end;
mod ingestion;
mod rerun;
