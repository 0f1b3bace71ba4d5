//! Row ids handed out by the lab store.
//!
//! Each kind of record gets its own type so a batch id can never be passed
//! where a sample id is expected.

use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// The SQLite rowid.
            #[must_use]
            pub const fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

row_id!(
    /// A registered sample.
    SampleId
);
row_id!(
    /// A plate batch at one stage.
    BatchId
);
row_id!(
    /// One analysis run, keyed by result file fingerprint.
    RunId
);
