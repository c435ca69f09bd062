//! Read/write capabilities over data sources.
//!
//! An accessor turns an N-d index into a value of some data source without
//! holding on to the data itself. Accessors never bounds-check: indices come
//! from an [`Extents`] range the caller has already validated.

use std::num::ParseFloatError;

use crate::element::{Domain, StorageLayout};
use crate::error::{FftError, FftResult};
use crate::extents::Extents;
use crate::operand::{Complex64, HostData};
use crate::strides::{StrideModel, Strides};

pub trait Accessor<D: ?Sized> {
    type Value;

    fn read(&self, idx: &[usize], data: &D) -> Self::Value;
}

pub trait AccessorMut<D: ?Sized>: Accessor<D> {
    fn write(&self, idx: &[usize], data: &mut D, value: Self::Value);
}

/// Move every element of `extents` from `src` to `dst`, row-major.
pub fn copy_with<DS, DD, R, W>(extents: &Extents, reader: &R, src: &DS, writer: &W, dst: &mut DD)
where
    DS: ?Sized,
    DD: ?Sized,
    R: Accessor<DS>,
    W: AccessorMut<DD>,
    R::Value: Into<W::Value>,
{
    for idx in extents.indices() {
        writer.write(&idx, dst, reader.read(&idx, src).into());
    }
}

/// Flat indexing of a slice through precomputed strides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayAccessor {
    strides: Strides,
}

impl ArrayAccessor {
    #[must_use]
    pub fn new(model: &StrideModel, extents: &Extents) -> Self {
        Self {
            strides: model.strides(extents),
        }
    }

    #[must_use]
    pub fn contiguous(extents: &Extents) -> Self {
        Self::new(&StrideModel::Contiguous, extents)
    }
}

impl<T: Copy> Accessor<[T]> for ArrayAccessor {
    type Value = T;

    fn read(&self, idx: &[usize], data: &[T]) -> T {
        data[self.strides.flatten(idx)]
    }
}

impl<T: Copy> AccessorMut<[T]> for ArrayAccessor {
    fn write(&self, idx: &[usize], data: &mut [T], value: T) {
        data[self.strides.flatten(idx)] = value;
    }
}

/// Data that is a function of the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctorAccessor;

impl<F, T> Accessor<F> for FunctorAccessor
where
    F: Fn(&[usize]) -> T,
{
    type Value = T;

    fn read(&self, idx: &[usize], data: &F) -> T {
        data(idx)
    }
}

/// Whitespace/newline delimited grid of numbers. Rows are lines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextGrid {
    rows: Vec<Vec<f64>>,
}

impl TextGrid {
    pub fn parse(text: &str) -> Result<Self, ParseFloatError> {
        let rows = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.split_whitespace()
                    .map(str::parse::<f64>)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows })
    }

    /// `(rows, columns)` of the grid, or `None` if empty or ragged.
    #[must_use]
    pub fn extents(&self) -> Option<Extents> {
        let columns = self.rows.first()?.len();
        if self.rows.iter().any(|row| row.len() != columns) {
            return None;
        }
        Extents::new([self.rows.len(), columns]).ok()
    }
}

/// Text sink that separates dimension 1 with spaces and dimension 0 with newlines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextSink {
    text: String,
    last_row: Option<usize>,
}

impl TextSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.text
    }
}

/// Reads [`TextGrid`]s and writes [`TextSink`]s. Rank 1 and 2 only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamAccessor;

impl Accessor<TextGrid> for StreamAccessor {
    type Value = f64;

    fn read(&self, idx: &[usize], data: &TextGrid) -> f64 {
        match idx {
            [column] => data.rows[0][*column],
            [row, column, ..] => data.rows[*row][*column],
            [] => data.rows[0][0],
        }
    }
}

/// Reads back a value already written; `NaN` where nothing parses.
impl Accessor<TextSink> for StreamAccessor {
    type Value = f64;

    fn read(&self, idx: &[usize], data: &TextSink) -> f64 {
        let (row, column) = match idx {
            [column] => (0, *column),
            [row, column, ..] => (*row, *column),
            [] => (0, 0),
        };
        data.text
            .lines()
            .nth(row)
            .and_then(|line| line.split_whitespace().nth(column))
            .and_then(|token| token.parse().ok())
            .unwrap_or(f64::NAN)
    }
}

impl AccessorMut<TextSink> for StreamAccessor {
    fn write(&self, idx: &[usize], data: &mut TextSink, value: f64) {
        let row = if idx.len() > 1 { idx[0] } else { 0 };
        match data.last_row {
            Some(previous) if previous != row => data.text.push('\n'),
            Some(_) => data.text.push(' '),
            None => {}
        }
        data.last_row = Some(row);
        data.text.push_str(&value.to_string());
    }
}

/// Packed RGBA pixels, red in the lowest byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u32>,
}

impl RgbaImage {
    #[must_use]
    pub fn extents(&self) -> Option<Extents> {
        Extents::new([self.height, self.width]).ok()
    }
}

/// Pixel lookup at `(row, column)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageAccessor;

impl Accessor<RgbaImage> for ImageAccessor {
    type Value = u32;

    fn read(&self, idx: &[usize], data: &RgbaImage) -> u32 {
        data.pixels[idx[0] * data.width + idx[1]]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSelector {
    Red,
    Green,
    Blue,
    Alpha,
}

impl ColorSelector {
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Red => 0,
            Self::Green => 8,
            Self::Blue => 16,
            Self::Alpha => 24,
        }
    }

    #[must_use]
    pub const fn select(self, pixel: u32) -> u8 {
        ((pixel >> self.shift()) & 0xFF) as u8
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteToFloat;

impl ByteToFloat {
    #[must_use]
    pub fn convert(self, byte: u8) -> f64 {
        f64::from(byte) / 255.0
    }
}

/// Applies `func` to every value read by `accessor`.
#[derive(Debug, Clone, Copy)]
pub struct Composite<A, F> {
    accessor: A,
    func: F,
}

impl<A, F> Composite<A, F> {
    pub const fn new(accessor: A, func: F) -> Self {
        Self { accessor, func }
    }
}

impl<D, A, F, V> Accessor<D> for Composite<A, F>
where
    D: ?Sized,
    A: Accessor<D>,
    F: Fn(A::Value) -> V,
{
    type Value = V;

    fn read(&self, idx: &[usize], data: &D) -> V {
        (self.func)(self.accessor.read(idx, data))
    }
}

/// Channel intensity in `[0, 1]`: byte-to-float of the selected channel of each pixel.
pub fn image_channel(channel: ColorSelector) -> impl Accessor<RgbaImage, Value = f64> {
    Composite::new(ImageAccessor, move |pixel: u32| {
        ByteToFloat.convert(channel.select(pixel))
    })
}

/// Combines two sources element-wise with a binary operator.
#[derive(Debug, Clone, Copy)]
pub struct ZipAccessor<A, B, F> {
    left: A,
    right: B,
    op: F,
}

impl<A, B, F> ZipAccessor<A, B, F> {
    pub const fn new(left: A, right: B, op: F) -> Self {
        Self { left, right, op }
    }
}

impl<'a, DA, DB, A, B, F, V> Accessor<(&'a DA, &'a DB)> for ZipAccessor<A, B, F>
where
    DA: ?Sized,
    DB: ?Sized,
    A: Accessor<DA>,
    B: Accessor<DB>,
    F: Fn(A::Value, B::Value) -> V,
{
    type Value = V;

    fn read(&self, idx: &[usize], data: &(&'a DA, &'a DB)) -> V {
        (self.op)(self.left.read(idx, data.0), self.right.read(idx, data.1))
    }
}

/// Window into a larger N-d source.
///
/// `offsets` has one entry per base dimension. When `fixed` names a base
/// dimension, that dimension is pinned at its offset and the view has one
/// dimension fewer than the base; otherwise the view keeps the base rank.
/// Index `i` of the view maps to `offsets[d] + i` in every free dimension `d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceView<A> {
    accessor: A,
    offsets: Vec<usize>,
    extents: Extents,
    fixed: Option<usize>,
}

impl<A> SliceView<A> {
    /// Same-rank window of `extents` elements starting at `offsets`.
    pub fn range(
        accessor: A,
        base: &Extents,
        offsets: impl Into<Vec<usize>>,
        extents: Extents,
    ) -> FftResult<Self> {
        Self::new(accessor, base, offsets.into(), extents, None)
    }

    /// Window that pins base dimension `fixed` at `offsets[fixed]`.
    pub fn slice(
        accessor: A,
        base: &Extents,
        fixed: usize,
        offsets: impl Into<Vec<usize>>,
        extents: Extents,
    ) -> FftResult<Self> {
        Self::new(accessor, base, offsets.into(), extents, Some(fixed))
    }

    fn new(
        accessor: A,
        base: &Extents,
        offsets: Vec<usize>,
        extents: Extents,
        fixed: Option<usize>,
    ) -> FftResult<Self> {
        if offsets.len() != base.rank() {
            return Err(FftError::RankMismatch {
                expected: base.rank(),
                actual: offsets.len(),
            });
        }
        if let Some(fixed) = fixed {
            if fixed >= base.rank() {
                return Err(FftError::InvalidDescriptor {
                    detail: "fixed dimension lies outside the base",
                });
            }
        }
        let view_rank = base.rank() - usize::from(fixed.is_some());
        if extents.rank() != view_rank {
            return Err(FftError::RankMismatch {
                expected: view_rank,
                actual: extents.rank(),
            });
        }
        let view = Self {
            accessor,
            offsets,
            extents,
            fixed,
        };
        for dim in 0..base.rank() {
            let offset = view.offsets[dim];
            let extent = view.view_dim(dim).map_or(1, |vdim| view.extents[vdim]);
            if offset.checked_add(extent).is_none_or(|end| end > base[dim]) {
                return Err(FftError::SliceOutOfRange {
                    dim,
                    offset,
                    extent,
                    base: base[dim],
                });
            }
        }
        Ok(view)
    }

    #[must_use]
    pub fn extents(&self) -> &Extents {
        &self.extents
    }

    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// View dimension backing base dimension `dim`, `None` for the fixed one.
    fn view_dim(&self, dim: usize) -> Option<usize> {
        match self.fixed {
            Some(fixed) if dim == fixed => None,
            Some(fixed) if dim > fixed => Some(dim - 1),
            _ => Some(dim),
        }
    }

    fn base_index(&self, idx: &[usize]) -> Vec<usize> {
        (0..self.offsets.len())
            .map(|dim| self.offsets[dim] + self.view_dim(dim).map_or(0, |vdim| idx[vdim]))
            .collect()
    }
}

impl<D, A> Accessor<D> for SliceView<A>
where
    D: ?Sized,
    A: Accessor<D>,
{
    type Value = A::Value;

    fn read(&self, idx: &[usize], data: &D) -> A::Value {
        self.accessor.read(&self.base_index(idx), data)
    }
}

impl<D, A> AccessorMut<D> for SliceView<A>
where
    D: ?Sized,
    A: AccessorMut<D>,
{
    fn write(&self, idx: &[usize], data: &mut D, value: A::Value) {
        self.accessor.write(&self.base_index(idx), data, value);
    }
}

/// Operand element access dispatched on [`StorageLayout`] at runtime.
///
/// Values are widened to `Complex64`; real operands read with a zero
/// imaginary part and drop it on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandAccessor {
    layout: StorageLayout,
    domain: Domain,
    strides: Strides,
}

impl OperandAccessor {
    #[must_use]
    pub fn new(layout: StorageLayout, domain: Domain, strides: Strides) -> Self {
        Self {
            layout,
            domain,
            strides,
        }
    }
}

impl Accessor<[HostData]> for OperandAccessor {
    type Value = Complex64;

    fn read(&self, idx: &[usize], planes: &[HostData]) -> Complex64 {
        let flat = self.strides.flatten(idx);
        match (self.layout, self.domain) {
            (_, Domain::Real) => Complex64::new(planes[0].get(flat), 0.0),
            (StorageLayout::SoA, Domain::Complex) => {
                Complex64::new(planes[0].get(flat), planes[1].get(flat))
            }
            (StorageLayout::AoS | StorageLayout::Strided, Domain::Complex) => {
                Complex64::new(planes[0].get(2 * flat), planes[0].get(2 * flat + 1))
            }
        }
    }
}

impl AccessorMut<[HostData]> for OperandAccessor {
    fn write(&self, idx: &[usize], planes: &mut [HostData], value: Complex64) {
        let flat = self.strides.flatten(idx);
        match (self.layout, self.domain) {
            (_, Domain::Real) => planes[0].set(flat, value.re),
            (StorageLayout::SoA, Domain::Complex) => {
                planes[0].set(flat, value.re);
                planes[1].set(flat, value.im);
            }
            (StorageLayout::AoS | StorageLayout::Strided, Domain::Complex) => {
                planes[0].set(2 * flat, value.re);
                planes[0].set(2 * flat + 1, value.im);
            }
        }
    }
}

/// File collaborator exposing a fixed-shape array of values.
pub trait FileSource {
    fn is_open(&self) -> bool;
    fn extents(&self) -> Extents;
    fn element_at(&self, idx: &[usize]) -> Complex64;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAccessor;

impl<S: FileSource + ?Sized> Accessor<S> for FileAccessor {
    type Value = Complex64;

    fn read(&self, idx: &[usize], data: &S) -> Complex64 {
        data.element_at(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Accessor, AccessorMut, ArrayAccessor, ColorSelector, FunctorAccessor, RgbaImage,
        SliceView, StreamAccessor, TextGrid, TextSink, ZipAccessor, copy_with, image_channel,
    };
    use crate::{Extents, FftError, StrideModel, Strides};

    fn extents(dims: &[usize]) -> Extents {
        Extents::new(dims.to_vec()).expect("valid extents")
    }

    #[test]
    fn array_accessor_follows_user_strides() {
        let ext = extents(&[2, 3]);
        let strides = Strides::from_user(vec![1, 2], &ext).expect("rank ok");
        let accessor = ArrayAccessor::new(&StrideModel::Strided(strides), &ext);
        let data = [0, 1, 2, 3, 4, 5];
        assert_eq!(accessor.read(&[1, 2], &data[..]), 5);
        assert_eq!(accessor.read(&[0, 1], &data[..]), 2);
    }

    #[test]
    fn copy_with_transposes_through_strides() {
        let ext = extents(&[2, 3]);
        let source: Vec<f64> = (0..6u32).map(f64::from).collect();
        let column_major = Strides::from_user(vec![1, 2], &ext).expect("rank ok");
        let mut target = vec![0.0; 6];
        copy_with(
            &ext,
            &ArrayAccessor::contiguous(&ext),
            &source[..],
            &ArrayAccessor::new(&StrideModel::Strided(column_major), &ext),
            &mut target[..],
        );
        assert_eq!(target, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn functor_accessor_generates_values() {
        let ext = extents(&[2, 2]);
        let generator = |idx: &[usize]| (idx[0] * 10 + idx[1]) as f64;
        let mut target = vec![0.0; 4];
        copy_with(
            &ext,
            &FunctorAccessor,
            &generator,
            &ArrayAccessor::contiguous(&ext),
            &mut target[..],
        );
        assert_eq!(target, vec![0.0, 1.0, 10.0, 11.0]);
    }

    #[test]
    fn stream_round_trip_uses_line_and_space_delimiters() {
        let grid = TextGrid::parse("1 2 3\n4 5 6\n").expect("numbers");
        let ext = grid.extents().expect("rectangular grid");
        assert_eq!(ext.dims(), &[2, 3]);
        let mut sink = TextSink::new();
        copy_with(&ext, &StreamAccessor, &grid, &StreamAccessor, &mut sink);
        assert_eq!(sink.as_str(), "1 2 3\n4 5 6");
    }

    #[test]
    fn text_sink_reads_back_written_values() {
        let ext = extents(&[2, 2]);
        let mut sink = TextSink::new();
        copy_with(
            &ext,
            &FunctorAccessor,
            &|idx: &[usize]| (idx[0] * 2 + idx[1]) as f64 + 0.5,
            &StreamAccessor,
            &mut sink,
        );
        assert_eq!(StreamAccessor.read(&[1, 0], &sink), 2.5);
        assert!(StreamAccessor.read(&[2, 0], &sink).is_nan());
    }

    #[test]
    fn ragged_text_has_no_extents() {
        let grid = TextGrid::parse("1 2\n3\n").expect("numbers");
        assert!(grid.extents().is_none());
        assert!(TextGrid::parse("1 x").is_err());
    }

    #[test]
    fn image_channel_decodes_selected_byte() {
        let image = RgbaImage {
            width: 2,
            height: 1,
            pixels: vec![0xFF00_00FF, 0x0000_FF00],
        };
        let red = image_channel(ColorSelector::Red);
        let green = image_channel(ColorSelector::Green);
        assert!((red.read(&[0, 0], &image) - 1.0).abs() < 1e-12);
        assert!((green.read(&[0, 1], &image) - 1.0).abs() < 1e-12);
        assert_eq!(green.read(&[0, 0], &image), 0.0);
        assert_eq!(ColorSelector::Alpha.select(0xFF00_00FF), 0xFF);
    }

    #[test]
    fn zip_combines_two_sources() {
        let ext = extents(&[3]);
        let lhs = [1.0, 2.0, 3.0];
        let rhs = [4.0, 5.0, 6.0];
        let zip = ZipAccessor::new(
            ArrayAccessor::contiguous(&ext),
            ArrayAccessor::contiguous(&ext),
            |a: f64, b: f64| a * b,
        );
        let data = (&lhs[..], &rhs[..]);
        let products: Vec<f64> = ext.indices().map(|idx| zip.read(&idx, &data)).collect();
        assert_eq!(products, vec![4.0, 10.0, 18.0]);
    }

    #[test]
    fn slice_view_pins_each_dimension_of_a_volume() {
        let base = extents(&[10, 12, 21]);
        let offsets = [2usize, 5, 3];
        let view_extents = extents(&[4, 6]);
        let array = ArrayAccessor::contiguous(&base);
        for fixed in 0..3 {
            let mut volume = vec![0.0f64; base.num_elements()];
            let view = SliceView::slice(array.clone(), &base, fixed, offsets, view_extents.clone())
                .expect("window inside the volume");
            let (outer, inner) = match fixed {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            for idx in view_extents.indices() {
                let value = (idx[0] * 100 + idx[1]) as f64 + 1.0;
                view.write(&idx, &mut volume[..], value);
                let mut base_idx = offsets.to_vec();
                base_idx[outer] += idx[0];
                base_idx[inner] += idx[1];
                assert_eq!(array.read(&base_idx, &volume[..]), value);
                assert_eq!(view.read(&idx, &volume[..]), value);
            }
            let written = volume.iter().filter(|&&value| value != 0.0).count();
            assert_eq!(written, view_extents.num_elements());
        }
    }

    #[test]
    fn range_view_keeps_rank_and_copies_window() {
        let base = extents(&[4, 5]);
        let source: Vec<f64> = (0..20u32).map(f64::from).collect();
        let window = extents(&[2, 3]);
        let view = SliceView::range(ArrayAccessor::contiguous(&base), &base, [1, 2], window.clone())
            .expect("inside");
        let mut target = vec![0.0; 6];
        copy_with(
            &window,
            &view,
            &source[..],
            &ArrayAccessor::contiguous(&window),
            &mut target[..],
        );
        assert_eq!(target, vec![7.0, 8.0, 9.0, 12.0, 13.0, 14.0]);
    }

    #[test]
    fn slice_view_rejects_windows_outside_the_base() {
        let base = extents(&[10, 12, 21]);
        let array = ArrayAccessor::contiguous(&base);
        assert_eq!(
            SliceView::slice(array.clone(), &base, 0, [10, 0, 0], extents(&[4, 6])),
            Err(FftError::SliceOutOfRange {
                dim: 0,
                offset: 10,
                extent: 1,
                base: 10
            })
        );
        assert_eq!(
            SliceView::slice(array.clone(), &base, 0, [0, 10, 0], extents(&[4, 6])),
            Err(FftError::SliceOutOfRange {
                dim: 1,
                offset: 10,
                extent: 4,
                base: 12
            })
        );
        assert!(matches!(
            SliceView::slice(array.clone(), &base, 3, [0, 0, 0], extents(&[4, 6])),
            Err(FftError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            SliceView::range(array, &base, [0, 0, 0], extents(&[4, 6])),
            Err(FftError::RankMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }
}
