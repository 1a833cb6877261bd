use std::path::PathBuf;

const DATA_DIR_NAME: &str = "network-mapper";

pub fn get_default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

const TOPOMAP_DATA_DIR: &str = "TOPOMAP_DATA_DIR";

pub fn get_data_dir() -> Option<PathBuf> {
    std::env::var_os(TOPOMAP_DATA_DIR).map(PathBuf::from)
}

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

pub fn get_default_bind_addr() -> String {
    DEFAULT_ADDR.to_string()
}

const TOPOMAP_ADDR: &str = "TOPOMAP_ADDR";

pub fn get_bind_addr() -> Option<String> {
    std::env::var(TOPOMAP_ADDR).ok()
}

const TOPOMAP_TOKEN: &str = "TOPOMAP_TOKEN";

pub fn get_token() -> Option<String> {
    std::env::var(TOPOMAP_TOKEN).ok().filter(|token| !token.is_empty())
}
