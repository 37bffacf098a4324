//! Local and remote accessors against the test process itself
#![cfg(windows)]

use memedit::core::types::WideChar;
use memedit::{
    Config, MemoryAccess, MemoryError, PrimitiveTag, PrimitiveValue, ProcessRegistry,
    StringEncoding,
};

fn registry() -> ProcessRegistry {
    ProcessRegistry::windows(Config::default())
}

#[test]
fn test_deadbeef_local_and_remote() {
    let registry = registry();
    let context = registry.current();
    let address = context.allocate_buffer(4).unwrap();

    let local = unsafe { context.local_memory() }.unwrap();
    local.write::<u32>(address, 0xDEADBEEF).unwrap();
    assert_eq!(local.read::<u32>(address).unwrap(), 0xDEADBEEF);

    let remote = context.memory().unwrap();
    assert_eq!(remote.read::<u32>(address).unwrap(), 0xDEADBEEF);
    remote.write::<u32>(address, 0xCAFEBABE).unwrap();
    assert_eq!(local.read::<u32>(address).unwrap(), 0xCAFEBABE);

    context.free(address).unwrap();
}

#[test]
fn test_arrays_through_remote_accessor() {
    let registry = registry();
    let context = registry.current();
    let memory = context.memory().unwrap();
    let address = context.allocate_buffer(64).unwrap();

    memory.write_array::<i32>(address, &[-1, 0, 1, i32::MAX]).unwrap();
    assert_eq!(
        memory.read_array::<i32>(address, 4).unwrap(),
        vec![-1, 0, 1, i32::MAX]
    );

    let chars = [WideChar(b'o' as u16), WideChar(b'k' as u16)];
    memory.write_array(address, &chars).unwrap();
    assert_eq!(memory.read_array::<WideChar>(address, 2).unwrap(), chars);

    match memory.write_array_values(address, &[PrimitiveValue::U32(7)]) {
        Err(MemoryError::UnsupportedType(_)) => {}
        other => panic!("Expected UnsupportedType, got {:?}", other),
    }
    assert!(memory
        .read_array_values(address, PrimitiveTag::U64, 1)
        .is_err());

    context.free(address).unwrap();
}

#[test]
fn test_strings_through_remote_accessor() {
    let registry = registry();
    let context = registry.current();
    let memory = context.memory().unwrap();
    let address = context.allocate_buffer(256).unwrap();

    for encoding in [StringEncoding::Ascii, StringEncoding::Utf8, StringEncoding::Utf16] {
        memory
            .write_string(address, "player one", encoding, true)
            .unwrap();
        assert_eq!(
            memory.read_string(address, encoding, 64).unwrap(),
            "player one"
        );
    }

    // A bound shorter than the string truncates instead of reading further
    assert_eq!(
        memory
            .read_string(address, StringEncoding::Utf16, 12)
            .unwrap(),
        "player"
    );

    context.free(address).unwrap();
}

#[test]
fn test_unmapped_read_fails() {
    let registry = registry();
    let memory = registry.current().memory().unwrap();
    let mut buffer = [0u8; 8];
    assert!(memory
        .read_bytes(memedit::Address::new(0x10), &mut buffer)
        .is_err());
}
