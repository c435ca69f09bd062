#![no_main]

use arbitrary::Arbitrary;
use fxl_fft::{
    Direction, ElementKind, Extents, FftError, Precision, SizeLimits, TransformDescriptor,
    TransformKind, negotiate, size_of,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct NegotiateInput {
    kind: u8,
    in_place: bool,
    single: bool,
    input: Vec<u16>,
    output: Option<Vec<u16>>,
    hint: Option<Vec<u16>>,
}

fn build_extents(values: &[u16]) -> Option<Extents> {
    let dims = values
        .iter()
        .take(4)
        .map(|&value| usize::from(value))
        .collect::<Vec<_>>();
    Extents::new(dims).ok()
}

fuzz_target!(|input: NegotiateInput| {
    let precision = if input.single {
        Precision::Single
    } else {
        Precision::Double
    };
    let Some(extents) = build_extents(&input.input) else {
        return;
    };
    let kind = match input.kind % 3 {
        0 => TransformKind::C2C,
        1 => TransformKind::R2C,
        _ => TransformKind::C2R,
    };
    let direction = if kind == TransformKind::C2R {
        Direction::Inverse
    } else {
        Direction::Forward
    };
    let Ok(descriptor) =
        TransformDescriptor::new(kind, direction, input.in_place, extents.rank(), precision)
    else {
        return;
    };
    let output = input.output.as_deref().and_then(build_extents);
    let hint = input.hint.as_deref().and_then(build_extents);

    match negotiate(&descriptor, &extents, output.as_ref(), hint.as_ref()) {
        Ok(layout) => {
            assert_eq!(layout.full_extents.rank(), descriptor.rank());
            assert_eq!(
                layout.packed_extents.last(),
                match kind {
                    TransformKind::C2C => layout.full_extents.last(),
                    _ => layout.full_extents.last() / 2 + 1,
                }
            );
            if let Some(padding) = &layout.in_place {
                assert_eq!(padding.padded_last_stride, 2 * layout.packed_extents.last());
            }
            let limits = SizeLimits::device();
            match size_of(&layout.full_extents, ElementKind::complex(precision), &limits) {
                Ok(bytes) => assert!(bytes as u64 <= limits.max_bytes),
                Err(err) => assert!(matches!(err, FftError::SizeTooLarge { .. })),
            }
        }
        Err(err) => assert!(err.is_setup_error()),
    }
});
