#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use phasecurve::config::{ConfigLoader, build_envelope};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let loader = ConfigLoader::with_defaults();
    // Anything that validates must also build and survive a short run.
    if let Ok(loaded) = loader.load_str(text, Path::new("fuzz.yaml")) {
        let mut envelope = build_envelope(&loaded.config).expect("validated config must build");
        if envelope.start().is_ok() {
            for _ in 0..16 {
                if envelope.tick(0.1).is_err() {
                    break;
                }
            }
        }
    }
});
