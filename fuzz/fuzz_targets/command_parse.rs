#![no_main]

use libfuzzer_sys::fuzz_target;
use repo_relay_engine::relay_command::is_target_exempt;
use repo_relay_engine::{generate_relay_signature, parse_command};

fuzz_target!(|data: &[u8]| {
    let body = String::from_utf8_lossy(data);
    if let Some(command) = parse_command(&body, "fuzzer") {
        assert!(!command.command_type.is_empty());
        assert_eq!(command.command_type, command.command_type.to_ascii_lowercase());
        assert!(command.target.is_some() || is_target_exempt(&command.command_type));
        assert_eq!(command.sender, "fuzzer");
    }
    let signature = generate_relay_signature("fuzz/origin", 1, &body, "fuzz/target");
    assert_eq!(signature.len(), 32);
});
