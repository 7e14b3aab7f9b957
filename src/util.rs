use std::{
    io,
    io::{Read, Seek, SeekFrom},
};

/// Creates a fixed-size array reference from a slice.
#[macro_export]
macro_rules! array_ref {
    ($slice:expr, $offset:expr, $size:expr) => {{
        #[inline(always)]
        fn to_array<T>(slice: &[T]) -> &[T; $size] {
            unsafe { &*(slice.as_ptr() as *const [_; $size]) }
        }
        to_array(&$slice[$offset..$offset + $size])
    }};
}

/// Compile-time assertion.
#[macro_export]
macro_rules! static_assert {
    ($condition:expr) => {
        const _: () = core::assert!($condition);
    };
}

/// A nested container inside another stream, such as a cartridge's secure partition.
///
/// Positions are relative to the start of the window, so the nested container
/// parses as if it started at offset zero. Seeks are clamped to the window and
/// `SeekFrom::End` is measured from the window's end.
pub struct WindowedReader<T>
where T: Read + Seek
{
    base: T,
    pos: u64,
    begin: u64,
    end: u64,
}

impl<T> WindowedReader<T>
where T: Read + Seek
{
    /// Opens the window of `size` bytes at `offset` and seeks to its start.
    pub fn new(mut base: T, offset: u64, size: u64) -> io::Result<Self> {
        let end = offset.checked_add(size).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("window {size:#X} at {offset:#X} overflows"),
            )
        })?;
        base.seek(SeekFrom::Start(offset))?;
        Ok(Self { base, pos: offset, begin: offset, end })
    }
}

impl<T> Read for WindowedReader<T>
where T: Read + Seek
{
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.pos);
        let len = out.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        if len == 0 {
            return Ok(0);
        }
        let len = self.base.read(&mut out[..len])?;
        self.pos += len as u64;
        Ok(len)
    }
}

impl<T> Seek for WindowedReader<T>
where T: Read + Seek
{
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => self.begin.saturating_add(p),
            SeekFrom::End(p) => self.end.saturating_add_signed(p),
            SeekFrom::Current(p) => self.pos.saturating_add_signed(p),
        };
        let target = target.clamp(self.begin, self.end);
        self.pos = self.base.seek(SeekFrom::Start(target))?;
        Ok(self.pos - self.begin)
    }

    fn stream_position(&mut self) -> io::Result<u64> { Ok(self.pos - self.begin) }
}
