pub(crate) const PRAGMAS: &str =
    "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;";

pub(crate) const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS samples (
        id INTEGER PRIMARY KEY,
        lab_number TEXT NOT NULL UNIQUE,
        case_number TEXT NOT NULL,
        role TEXT NOT NULL,
        status TEXT NOT NULL,
        batch_id INTEGER REFERENCES batches(id),
        well TEXT,
        archived INTEGER NOT NULL DEFAULT 0,
        collected_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_samples_status
    ON samples(status, collected_at, id) WHERE archived = 0;

    -- One row per applied transition. Never updated, never deleted.
    CREATE TABLE IF NOT EXISTS sample_audit (
        id INTEGER PRIMARY KEY,
        sample_id INTEGER NOT NULL REFERENCES samples(id),
        from_status TEXT NOT NULL,
        to_status TEXT NOT NULL,
        actor TEXT NOT NULL,
        context_json TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_sample_audit_sample
    ON sample_audit(sample_id, id);

    CREATE TRIGGER IF NOT EXISTS sample_audit_no_update
    BEFORE UPDATE ON sample_audit
    BEGIN
        SELECT RAISE(ABORT, 'audit entries are immutable');
    END;

    CREATE TRIGGER IF NOT EXISTS sample_audit_no_delete
    BEFORE DELETE ON sample_audit
    BEGIN
        SELECT RAISE(ABORT, 'audit entries are immutable');
    END;

    CREATE TABLE IF NOT EXISTS batches (
        id INTEGER PRIMARY KEY,
        batch_number TEXT NOT NULL UNIQUE,
        stage TEXT NOT NULL,
        status TEXT NOT NULL,
        layout_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS batch_wells (
        batch_id INTEGER NOT NULL REFERENCES batches(id),
        well TEXT NOT NULL,
        sample_id INTEGER NOT NULL REFERENCES samples(id),
        stage TEXT NOT NULL,
        open INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (batch_id, well),
        UNIQUE (batch_id, sample_id)
    );

    -- A sample sits in at most one open batch per stage.
    CREATE UNIQUE INDEX IF NOT EXISTS idx_batch_wells_open_sample
    ON batch_wells(stage, sample_id) WHERE open = 1;

    CREATE TABLE IF NOT EXISTS analysis_runs (
        id INTEGER PRIMARY KEY,
        source_path TEXT NOT NULL,
        fingerprint TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        error TEXT,
        kit TEXT,
        instrument TEXT,
        run_date TEXT,
        case_number TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sample_results (
        id INTEGER PRIMARY KEY,
        run_id INTEGER NOT NULL REFERENCES analysis_runs(id),
        sample_name TEXT NOT NULL,
        lab_number TEXT,
        role TEXT NOT NULL,
        status TEXT NOT NULL,
        confidence REAL,
        loci_detected INTEGER NOT NULL,
        issues_json TEXT NOT NULL,
        UNIQUE (run_id, sample_name)
    );

    CREATE TABLE IF NOT EXISTS locus_comparisons (
        run_id INTEGER NOT NULL REFERENCES analysis_runs(id),
        locus TEXT NOT NULL,
        child_allele_1 TEXT NOT NULL,
        child_allele_2 TEXT NOT NULL,
        father_allele_1 TEXT NOT NULL,
        father_allele_2 TEXT NOT NULL,
        mother_allele_1 TEXT,
        mother_allele_2 TEXT,
        verdict TEXT NOT NULL,
        PRIMARY KEY (run_id, locus)
    );

    CREATE TABLE IF NOT EXISTS paternity_conclusions (
        run_id INTEGER PRIMARY KEY REFERENCES analysis_runs(id),
        child_sample TEXT NOT NULL,
        father_sample TEXT NOT NULL,
        loci_compared INTEGER NOT NULL,
        matching_loci INTEGER NOT NULL,
        excluding_loci INTEGER NOT NULL,
        conclusion TEXT NOT NULL,
        probability REAL,
        maternal_loci_compared INTEGER,
        maternal_matching_loci INTEGER,
        maternal_match_rate REAL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS str_profiles (
        sample_id INTEGER NOT NULL REFERENCES samples(id),
        locus TEXT NOT NULL,
        allele_1 TEXT NOT NULL,
        allele_2 TEXT NOT NULL,
        run_id INTEGER NOT NULL REFERENCES analysis_runs(id),
        updated_at TEXT NOT NULL,
        PRIMARY KEY (sample_id, locus)
    );

    CREATE TABLE IF NOT EXISTS processing_ledger (
        path TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        status TEXT NOT NULL,
        run_id INTEGER REFERENCES analysis_runs(id),
        error TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        first_seen_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (path, fingerprint)
    );

    CREATE INDEX IF NOT EXISTS idx_processing_ledger_status
    ON processing_ledger(status);
";
