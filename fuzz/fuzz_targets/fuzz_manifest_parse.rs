#![no_main]
use codex_cartridge::schema::StructuralValidator;
use codex_cartridge::Manifest;
use libfuzzer_sys::fuzz_target;

// Arbitrary JSON must never panic the structural check or the typed parse
fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    if let Ok(validator) = StructuralValidator::builtin() {
        let _ = validator.check(&value);
    }
    if let Ok(manifest) = Manifest::from_value(value) {
        let _ = manifest.to_json_pretty();
    }
});
