//! Shared test utilities and fixtures
//!
//! A scratch lab: database, result directory, fixed clock and an event
//! channel, wired the same way the daemon wires them.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use strlab_engine::{
    ChannelSink, FixedClock, IngestWorker, LabEvent, Services, Settings, WorkflowEngine,
};
use strlab_types::{NewSample, SampleId, SampleRole};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Thirteen CODIS core loci used by the fixtures.
pub const CORE_LOCI: [&str; 13] = [
    "D8S1179", "D21S11", "D7S820", "CSF1PO", "D3S1358", "TH01", "D13S317", "D16S539", "D2S1338",
    "D19S433", "vWA", "TPOX", "D18S51",
];

pub struct Lab {
    pub dir: TempDir,
    pub services: Services,
    pub clock: Arc<FixedClock>,
    pub events: UnboundedReceiver<LabEvent>,
}

impl Lab {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            db_path: dir.path().join("lab.db"),
            output_dir: dir.path().join("results"),
            poll_interval: Duration::from_millis(20),
            sweep_interval: Duration::from_millis(20),
            ..Settings::default()
        };
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap(),
        ));
        let (sink, events) = ChannelSink::new();
        let services = Services::new(settings, Arc::new(sink)).with_clock(clock.clone());
        Self {
            dir,
            services,
            clock,
            events,
        }
    }

    pub fn engine(&self) -> WorkflowEngine {
        self.services.open_engine().expect("open engine")
    }

    pub fn worker(&self) -> IngestWorker {
        self.services.open_worker().expect("open worker")
    }

    /// Register `labs` a minute apart, in order.
    pub fn register(
        &self,
        engine: &mut WorkflowEngine,
        labs: &[(&str, SampleRole)],
    ) -> Vec<SampleId> {
        labs.iter()
            .map(|(lab, role)| {
                self.clock.advance(chrono::Duration::minutes(1));
                engine
                    .register_sample(&NewSample::new(*lab, "CASE-2026-001", *role))
                    .expect("register")
                    .id
            })
            .collect()
    }

    pub fn write_result(&self, name: &str, document: &Value) -> PathBuf {
        let dir = &self.services.settings.output_dir;
        std::fs::create_dir_all(dir).expect("create result dir");
        let path = dir.join(name);
        std::fs::write(&path, document.to_string()).expect("write result");
        path
    }

    pub fn drain_events(&mut self) -> Vec<LabEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Same pair at every core locus, plus Amelogenin.
pub fn uniform_profile(alleles: [&str; 2], sex: [&str; 2]) -> Value {
    let mut loci = serde_json::Map::new();
    for locus in CORE_LOCI {
        loci.insert(locus.to_string(), json!(alleles));
    }
    loci.insert("Amelogenin".to_string(), json!(sex));
    Value::Object(loci)
}

/// A trio result document in the instrument's JSON shape. Roles come from the
/// sample names.
pub fn trio_result(child: &str, father: &str, mother: &str, father_alleles: [&str; 2]) -> Value {
    json!({
        "kit": "Identifiler Plus",
        "instrument": "ABI 3130",
        "run_date": "2026-10-15T09:30:00Z",
        "case_number": "CASE-2026-001",
        "samples": [
            {
                "sample_name": "IDENTIFILER_CHILD_001",
                "lab_number": child,
                "status": "pass",
                "confidence": 0.98,
                "loci": uniform_profile(["12", "13"], ["X", "Y"])
            },
            {
                "sample_name": "IDENTIFILER_AF_001",
                "lab_number": father,
                "loci": uniform_profile(father_alleles, ["X", "Y"])
            },
            {
                "sample_name": "IDENTIFILER_MOTHER_001",
                "lab_number": mother,
                "loci": uniform_profile(["12", "16"], ["X", "X"])
            }
        ]
    })
}
