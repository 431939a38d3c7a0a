//! Identity newtypes shared by the movement and hauling layers.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// A worker agent.
    AgentId(u32),
    "agent#"
);
id_type!(
    /// A haul task. Allocated monotonically by the work allocator.
    TaskId(u64),
    "task#"
);
id_type!(StockpileId(u32), "stockpile#");
id_type!(SiteId(u32), "site#");
id_type!(
    /// Resource slot, unique within its stockpile.
    SlotKey(u32),
    "slot#"
);
id_type!(
    /// Construction block, unique within its site.
    BlockKey(u32),
    "block#"
);
