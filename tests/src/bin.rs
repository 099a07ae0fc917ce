#![cfg(test)]

use std::sync::Once;

mod gdrive;
mod sync;
mod utils;
mod stubs {
    pub mod store;
    pub mod token;
}

static LOG_INIT: Once = Once::new();

fn init_log() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
