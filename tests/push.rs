use std::error::Error;

use vklaunch::{PushConstant, PushConstants};

#[derive(Debug, Clone, Copy, PushConstants)]
struct Mixed {
    count: u32,
    #[push_constants(skip)]
    #[allow(dead_code)]
    label: &'static str,
    scale: f32,
    offset: f64,
}

#[derive(Debug, Clone, Copy, PushConstants)]
struct Tuple(u32, f32);

#[derive(Debug, Default, PushConstants)]
struct Empty {}

#[derive(Debug, Clone, Copy, PushConstants)]
#[push_constants(bound = "T: Copy, vklaunch::PushConstant: From<T>")]
struct Generic<T> {
    value: T,
    n: u32,
}

#[test]
fn test_derive_order_and_skip() -> Result<(), Box<dyn Error>> {
    let mixed = Mixed {
        count: 5,
        label: "ignored",
        scale: 1.5,
        offset: 2.25,
    };
    assert_eq!(
        mixed.push_constants(),
        vec![
            PushConstant::U32(5),
            PushConstant::F32(1.5),
            PushConstant::F64(2.25)
        ]
    );

    let bytes = mixed.pack();
    assert_eq!(bytes.len(), 16);
    assert_eq!(u32::from_ne_bytes(bytes[0..4].try_into()?), 5);
    assert_eq!(f32::from_ne_bytes(bytes[4..8].try_into()?), 1.5);
    assert_eq!(f64::from_ne_bytes(bytes[8..16].try_into()?), 2.25);
    Ok(())
}

#[test]
fn test_derive_tuple_and_empty() {
    assert_eq!(
        Tuple(7, 0.5).push_constants(),
        vec![PushConstant::U32(7), PushConstant::F32(0.5)]
    );
    assert!(Empty::default().pack().is_empty());
}

#[test]
fn test_derive_generic() {
    let generic = Generic { value: 3.0f64, n: 1 };
    assert_eq!(
        generic.push_constants(),
        vec![PushConstant::F64(3.0), PushConstant::U32(1)]
    );
    assert_eq!(generic.pack().len(), 12);

    let generic = Generic { value: 2u32, n: 4 };
    assert_eq!(
        generic.push_constants(),
        vec![PushConstant::U32(2), PushConstant::U32(4)]
    );
}
