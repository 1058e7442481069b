use std::{
    mem::size_of,
    ops::Range,
    sync::{Arc, PoisonError, RwLock, Weak},
};

use assert2::debug_assert;
use bytemuck::Pod;

use crate::{
    device::DeviceShared,
    error::{Error, Result},
};

/// Role of a buffer within its geometry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferType {
    Index,
    Vertex,
    VertexAttribute,
}

/// Element format of a buffer. All formats are made of 4 byte components.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Float,
    Float2,
    Float3,
    Float4,
    Uint,
    Uint2,
    Uint3,
    Uint4,
}

impl Format {
    pub fn component_count(self) -> usize {
        match self {
            Format::Float | Format::Uint => 1,
            Format::Float2 | Format::Uint2 => 2,
            Format::Float3 | Format::Uint3 => 3,
            Format::Float4 | Format::Uint4 => 4,
        }
    }

    /// Size of one element in bytes
    pub fn element_size(self) -> usize {
        self.component_count() * size_of::<u32>()
    }
}

/// Words of buffer data, owned by the geometry.
pub(crate) type BufferStorage = RwLock<Vec<u32>>;

/// Shape of a buffer: where its elements live inside the storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BufferLayout {
    pub buffer_type: BufferType,
    pub slot: u32,
    pub format: Format,
    pub byte_stride: usize,
    pub len: usize,
}

impl BufferLayout {
    pub fn new(
        buffer_type: BufferType,
        slot: u32,
        format: Format,
        byte_stride: usize,
        len: usize,
    ) -> Result<BufferLayout> {
        if byte_stride % size_of::<u32>() != 0 {
            return Err(Error::InvalidLayoutError(format!(
                "Byte stride {byte_stride} is not a multiple of 4"
            )));
        }
        if byte_stride < format.element_size() {
            return Err(Error::InvalidLayoutError(format!(
                "Byte stride {byte_stride} is smaller than the size of {format:?}"
            )));
        }
        if len == 0 {
            return Err(Error::InvalidLayoutError(
                "Buffer must have at least one item".to_owned(),
            ));
        }
        // Storage must stay addressable as a single allocation
        if byte_stride
            .checked_mul(len)
            .is_none_or(|bytes| bytes > isize::MAX as usize)
        {
            return Err(Error::InvalidLayoutError(format!(
                "Buffer of {len} items with stride {byte_stride} is too large"
            )));
        }

        Ok(BufferLayout {
            buffer_type,
            slot,
            format,
            byte_stride,
            len,
        })
    }

    fn stride_words(&self) -> usize {
        self.byte_stride / size_of::<u32>()
    }

    fn element_words(&self) -> usize {
        self.format.component_count()
    }

    pub fn storage_words(&self) -> usize {
        self.stride_words() * self.len
    }

    fn item_words(&self, index: usize) -> Range<usize> {
        let start = index * self.stride_words();
        start..start + self.element_words()
    }

    fn check_item_type<T: Pod>(&self) -> Result<()> {
        if size_of::<T>() == self.format.element_size() {
            Ok(())
        } else {
            Err(Error::InvalidLayoutError(format!(
                "Item of {} bytes doesn't match {:?} ({} bytes)",
                size_of::<T>(),
                self.format,
                self.format.element_size()
            )))
        }
    }

    fn check_range(&self, first: usize, count: usize) -> Result<()> {
        match first.checked_add(count) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::IndexError {
                index: first.saturating_add(count.saturating_sub(1)),
                len: self.len,
            }),
        }
    }

    /// Copies `count` items starting at `first` out of the storage words.
    /// Range and item type must be checked already.
    pub fn read_items<T: Pod>(&self, words: &[u32], first: usize, count: usize) -> Vec<T> {
        debug_assert!(words.len() == self.storage_words());
        (first..first + count)
            .map(|i| bytemuck::pod_read_unaligned(bytemuck::cast_slice(&words[self.item_words(i)])))
            .collect()
    }

    fn write_items<T: Pod>(&self, words: &mut [u32], first: usize, items: &[T]) {
        debug_assert!(words.len() == self.storage_words());
        for (i, item) in items.iter().enumerate() {
            let range = self.item_words(first + i);
            bytemuck::cast_slice_mut::<u32, u8>(&mut words[range])
                .copy_from_slice(bytemuck::bytes_of(item));
        }
    }
}

/// Handle to a buffer of a geometry.
///
/// The data is stored in the geometry, the handle only refers to it.
/// Writes are visible to the geometry immediately (and to scenes after the geometry
/// and the scene are committed again).
/// Once the geometry is gone, or the buffer was replaced by a new one in the same slot,
/// every access fails with [`Error::UseAfterRelease`].
#[derive(Clone, Debug)]
pub struct Buffer {
    layout: BufferLayout,
    storage: Weak<BufferStorage>,
    device: Arc<DeviceShared>,
}

impl Buffer {
    pub(crate) fn new(
        layout: BufferLayout,
        storage: &Arc<BufferStorage>,
        device: Arc<DeviceShared>,
    ) -> Buffer {
        Buffer {
            layout,
            storage: Arc::downgrade(storage),
            device,
        }
    }

    pub fn buffer_type(&self) -> BufferType {
        self.layout.buffer_type
    }

    pub fn slot(&self) -> u32 {
        self.layout.slot
    }

    pub fn format(&self) -> Format {
        self.layout.format
    }

    pub fn byte_stride(&self) -> usize {
        self.layout.byte_stride
    }

    /// Number of items in the buffer
    pub fn len(&self) -> usize {
        self.layout.len
    }

    pub fn is_empty(&self) -> bool {
        self.layout.len == 0
    }

    fn storage(&self) -> Result<Arc<BufferStorage>> {
        self.device.ensure_alive("Buffer")?;
        self.storage.upgrade().ok_or(Error::UseAfterRelease("Buffer"))
    }

    /// Writes items into the buffer, starting at item index `first`.
    /// `T` must have exactly the size of the buffer's element format, e.g. `[f32; 3]` for `Float3`.
    pub fn write<T: Pod>(&self, first: usize, items: &[T]) -> Result<()> {
        self.layout.check_item_type::<T>()?;
        self.layout.check_range(first, items.len())?;
        let storage = self.storage()?;

        let mut words = storage.write().unwrap_or_else(PoisonError::into_inner);
        self.layout.write_items(&mut words, first, items);
        Ok(())
    }

    /// Reads `count` items starting at item index `first`.
    pub fn read<T: Pod>(&self, first: usize, count: usize) -> Result<Vec<T>> {
        self.layout.check_item_type::<T>()?;
        self.layout.check_range(first, count)?;
        let storage = self.storage()?;

        let words = storage.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self.layout.read_items(&words, first, count))
    }

    /// Reads the whole buffer
    pub fn to_vec<T: Pod>(&self) -> Result<Vec<T>> {
        self.read(0, self.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::Device;

    use assert2::{assert, let_assert};
    use test_case::test_case;

    fn make_buffer(format: Format, byte_stride: usize, len: usize) -> (Arc<BufferStorage>, Buffer) {
        let layout = BufferLayout::new(BufferType::Vertex, 0, format, byte_stride, len).unwrap();
        let storage = Arc::new(RwLock::new(vec![0u32; layout.storage_words()]));
        let device = Device::new().unwrap();
        let buffer = Buffer::new(layout, &storage, device.shared());
        (storage, buffer)
    }

    #[test_case(Format::Float, 4)]
    #[test_case(Format::Uint2, 8)]
    #[test_case(Format::Float3, 12)]
    #[test_case(Format::Uint4, 16)]
    fn element_sizes(format: Format, size: usize) {
        assert!(format.element_size() == size);
    }

    #[test_case(Format::Float3, 10, 1 ; "unaligned_stride")]
    #[test_case(Format::Float3, 8, 1 ; "stride_too_small")]
    #[test_case(Format::Uint, 4, 0 ; "no_items")]
    fn invalid_layouts(format: Format, byte_stride: usize, len: usize) {
        let_assert!(
            Err(Error::InvalidLayoutError(_)) =
                BufferLayout::new(BufferType::Index, 0, format, byte_stride, len)
        );
    }

    #[test_case(Format::Float3, 12, usize::MAX / 3 + 2 ; "wrapping_size")]
    #[test_case(Format::Float3, 16, usize::MAX / 16 + 1 ; "overflowing_size")]
    #[test_case(Format::Uint, 4, isize::MAX as usize / 4 + 1 ; "over_allocation_limit")]
    fn oversized_layouts(format: Format, byte_stride: usize, len: usize) {
        let_assert!(
            Err(Error::InvalidLayoutError(_)) =
                BufferLayout::new(BufferType::Vertex, 0, format, byte_stride, len)
        );
    }

    #[test]
    fn strided_round_trip() {
        let (storage, buffer) = make_buffer(Format::Float3, 16, 3);
        let data = [[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        buffer.write(0, &data).unwrap();

        assert!(buffer.to_vec::<[f32; 3]>().unwrap() == data);
        assert!(buffer.read::<[f32; 3]>(1, 2).unwrap() == data[1..]);

        // Padding words between the elements stay untouched
        let words = storage.read().unwrap();
        assert!(words[3] == 0);
        assert!(words[4] == 4.0f32.to_bits());
    }

    #[test]
    fn partial_write() {
        let (_storage, buffer) = make_buffer(Format::Uint, 4, 4);
        buffer.write(2, &[7u32, 8]).unwrap();
        assert!(buffer.to_vec::<u32>().unwrap() == [0, 0, 7, 8]);
    }

    #[test]
    fn byte_arrays_are_accepted() {
        let (_storage, buffer) = make_buffer(Format::Uint, 4, 1);
        buffer.write(0, &[[1u8, 0, 0, 0]]).unwrap();
        assert!(buffer.to_vec::<u32>().unwrap() == [u32::from_le_bytes([1, 0, 0, 0])]);
    }

    #[test]
    fn wrong_item_size() {
        let (_storage, buffer) = make_buffer(Format::Float3, 12, 2);
        let_assert!(Err(Error::InvalidLayoutError(_)) = buffer.write(0, &[[1.0f32; 4]]));
        let_assert!(Err(Error::InvalidLayoutError(_)) = buffer.read::<f32>(0, 1));
    }

    #[test]
    fn out_of_range() {
        let (_storage, buffer) = make_buffer(Format::Uint, 4, 2);
        let_assert!(Err(Error::IndexError { index: 2, len: 2 }) = buffer.write(1, &[1u32, 2]));
        let_assert!(Err(Error::IndexError { .. }) = buffer.read::<u32>(3, 0));
        let_assert!(Ok(empty) = buffer.read::<u32>(2, 0));
        assert!(empty.is_empty());
    }

    #[test]
    fn dropped_storage() {
        let (storage, buffer) = make_buffer(Format::Uint, 4, 1);
        drop(storage);
        let_assert!(Err(Error::UseAfterRelease(_)) = buffer.write(0, &[1u32]));
    }
}
