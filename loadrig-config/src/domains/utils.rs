//! Serde default helpers shared by the config domains

pub fn default_true() -> bool {
    true
}

pub fn default_false() -> bool {
    false
}
