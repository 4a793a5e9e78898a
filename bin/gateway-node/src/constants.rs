pub(crate) const DEFAULT_THREAD_COUNT: usize = 4;

pub(crate) const DEFAULT_CONFIG_FILE: &str = "config.toml";
