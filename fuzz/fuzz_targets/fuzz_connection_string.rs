#![no_main]

use libfuzzer_sys::fuzz_target;
use pgbridge::client::ConnectionInfo;

fuzz_target!(|data: &[u8]| {
    let Ok(dsn) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(info) = ConnectionInfo::parse(dsn) {
        let _ = info.to_config();
        let _ = info.to_tls_config();
    }
});
