//! Configuration access port trait.
//!
//! Values are addressed by INI-style `[section] key`. Typed getters fall
//! back to `default` when the key is absent or does not parse.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;

    /// True when `[section] key` is present with a non-empty value.
    fn has_key(&self, section: &str, key: &str) -> bool {
        self.get_string(section, key).is_some_and(|v| !v.trim().is_empty())
    }
}
