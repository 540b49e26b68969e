use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// The sender of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model")]
    #[strum(to_string = "assistant", serialize = "model")]
    Assistant,
    System,
    Tool,
}
