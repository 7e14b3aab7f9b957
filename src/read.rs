use std::{
    ffi::CStr,
    io,
    io::{Read, Seek, SeekFrom},
};

use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::error::{Error, Result};

/// Reads a fixed-layout value from the stream.
#[inline]
pub fn read_from<T, R>(reader: &mut R) -> io::Result<T>
where
    T: FromBytes + IntoBytes,
    R: Read + ?Sized,
{
    let mut value = T::new_zeroed();
    reader.read_exact(value.as_mut_bytes())?;
    Ok(value)
}

/// Reads `count` fixed-layout values from the stream.
#[inline]
pub fn read_vec<T, R>(reader: &mut R, count: usize) -> io::Result<Vec<T>>
where
    T: FromBytes + IntoBytes,
    R: Read + ?Sized,
{
    Ok(read_box_slice(reader, count)?.into_vec())
}

/// Reads `count` fixed-layout values from the stream into a boxed slice.
#[inline]
pub fn read_box_slice<T, R>(reader: &mut R, count: usize) -> io::Result<Box<[T]>>
where
    T: FromBytes + IntoBytes,
    R: Read + ?Sized,
{
    let mut values = <[T]>::new_box_zeroed_with_elems(count)
        .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;
    reader.read_exact(values.as_mut_bytes())?;
    Ok(values)
}

/// Adds a stored offset to a base position, failing on overflow.
#[inline]
pub fn add_offset(base: u64, offset: u64, what: &str) -> Result<u64> {
    base.checked_add(offset).ok_or_else(|| {
        Error::TruncatedContainer(format!("{what}: offset {offset:#X} past {base:#X} overflows"))
    })
}

/// Checks that `len` bytes at `offset` lie within the stream.
///
/// Leaves the stream positioned at its end.
pub fn ensure_within<R>(reader: &mut R, offset: u64, len: u64, what: &str) -> Result<()>
where R: Seek + ?Sized {
    let stream_len = reader.seek(SeekFrom::End(0))?;
    match offset.checked_add(len) {
        Some(end) if end <= stream_len => Ok(()),
        _ => Err(Error::TruncatedContainer(format!(
            "{what}: {len:#X} bytes at {offset:#X} exceed stream of {stream_len:#X} bytes"
        ))),
    }
}

/// Reads `len` bytes at `offset` after checking them against the stream length.
pub fn read_bytes_at<R>(reader: &mut R, offset: u64, len: u64, what: &str) -> Result<Vec<u8>>
where R: Read + Seek + ?Sized {
    ensure_within(reader, offset, len, what)?;
    let mut data = vec![0u8; len as usize];
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(&mut data).map_err(|e| Error::truncated(e, what))?;
    Ok(data)
}

/// Returns `len` bytes at `offset`, or `None` if the range leaves the buffer.
#[inline]
pub fn slice_at(data: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    data.get(offset..offset.checked_add(len)?)
}

/// Reads a NUL-terminated string from a fixed-size field.
///
/// A field without a terminator is used in full. Invalid UTF-8 is replaced.
pub fn fixed_str(field: &[u8]) -> String {
    match CStr::from_bytes_until_nul(field) {
        Ok(c_str) => c_str.to_string_lossy().into_owned(),
        Err(_) => String::from_utf8_lossy(field).into_owned(),
    }
}
