#![no_main]

use arbitrary::Arbitrary;
use fxl_fft::{Extents, Strides};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct StrideInput {
    dims: Vec<(u8, u16)>,
}

fuzz_target!(|input: StrideInput| {
    let pairs = input.dims.iter().take(3).collect::<Vec<_>>();
    let dims = pairs
        .iter()
        .map(|(extent, _)| usize::from(*extent))
        .collect::<Vec<_>>();
    let Ok(extents) = Extents::new(dims) else {
        return;
    };
    let values = pairs
        .iter()
        .map(|(_, stride)| usize::from(*stride))
        .collect::<Vec<_>>();
    let Ok(strides) = Strides::from_user(values, &extents) else {
        return;
    };
    if strides.validate_non_overlapping(&extents).is_ok() {
        // non-overlapping strides address every index at a distinct offset
        let mut offsets = extents
            .indices()
            .take(4096)
            .map(|idx| strides.flatten(&idx))
            .collect::<Vec<_>>();
        let count = offsets.len();
        offsets.sort_unstable();
        offsets.dedup();
        assert_eq!(offsets.len(), count);
        assert!(offsets.iter().all(|&offset| offset < strides.span(&extents)));
    }
});
