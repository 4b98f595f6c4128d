#![no_main]

use libfuzzer_sys::fuzz_target;
use pg_trustpool::config::ConnectionInfo;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(info) = ConnectionInfo::parse(text) {
        assert!(!info.host.is_empty());
        assert!(!info.database.is_empty());
        let target = info.target();
        assert_eq!(target.port, info.port);
    }
});
