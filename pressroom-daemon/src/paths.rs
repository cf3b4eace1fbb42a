use std::path::{Path, PathBuf};

use pressroom_core::config::{config_path_at, PRESSROOM_DIR};

pub const DAEMON_SOCKET: &str = "pressroom.sock";

pub fn pressroom_root(home: &Path) -> PathBuf {
    home.join(PRESSROOM_DIR)
}

pub fn run_dir(home: &Path) -> PathBuf {
    pressroom_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    pressroom_root(home).join(DAEMON_SOCKET)
}

pub fn config_path(home: &Path) -> PathBuf {
    config_path_at(home)
}
