//! Saving and loading tables.
//!
//! A saved table starts with a header holding a signature, a format version
//! and the number of records, all integers little-endian:
//!
//! ```text
//! +----------------------+---------+-------------+
//! | "HOPTABLE\x1a" (9 B) | version | count (u64) |
//! +----------------------+---------+-------------+
//! ```
//!
//! Each record is a key followed by its value, both encoded with [`Persist`].
//! Sets are saved as tables with `()` values, which take no space.

use crate::{HashSet, HashTable};

use std::fmt;
use std::fs::File;
use std::hash::{BuildHasher, Hash};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// The signature at the start of every saved table.
pub const MAGIC: &[u8; 9] = b"HOPTABLE\x1a";

/// The current format version.
pub const VERSION: u8 = 1;

/// An error encountered while saving or loading a table.
#[derive(Debug)]
pub enum Error {
    /// An I/O error, including malformed records.
    Io(io::Error),
    /// The input does not start with the table signature.
    BadSignature,
    /// The input was written with an unknown format version.
    UnsupportedVersion(u8),
    /// The input ended in the middle of the header or a record.
    Truncated,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "i/o error: {err}"),
            Error::BadSignature => write!(f, "missing table signature"),
            Error::UnsupportedVersion(version) => {
                write!(f, "unsupported format version {version} (expected {VERSION})")
            }
            Error::Truncated => write!(f, "unexpected end of input"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::Truncated
        } else {
            Error::Io(err)
        }
    }
}

fn invalid(msg: &'static str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
}

/// A type that can be written to and read back from a saved table.
///
/// # Examples
///
/// ```
/// use hoptable::persist::{Error, Persist};
/// use std::io::{Read, Write};
///
/// struct Point(i32, i32);
///
/// impl Persist for Point {
///     fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
///         self.0.write(writer)?;
///         self.1.write(writer)
///     }
///
///     fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
///         Ok(Point(i32::read(reader)?, i32::read(reader)?))
///     }
/// }
/// ```
pub trait Persist: Sized {
    /// Writes the encoded value.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error>;

    /// Reads a value written by [`write`](Persist::write).
    fn read<R: Read>(reader: &mut R) -> Result<Self, Error>;
}

fn read_array<const N: usize, R: Read>(reader: &mut R) -> Result<[u8; N], Error> {
    let mut bytes = [0; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

macro_rules! persist_int {
    ($($int:ty),*) => {$(
        impl Persist for $int {
            fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
                writer.write_all(&self.to_le_bytes())?;
                Ok(())
            }

            fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
                Ok(<$int>::from_le_bytes(read_array(reader)?))
            }
        }
    )*};
}

persist_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

// Pointer-sized integers are always saved as 64 bits.
impl Persist for usize {
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        (*self as u64).write(writer)
    }

    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        usize::try_from(u64::read(reader)?).map_err(|_| invalid("integer out of range"))
    }
}

impl Persist for isize {
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        (*self as i64).write(writer)
    }

    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        isize::try_from(i64::read(reader)?).map_err(|_| invalid("integer out of range"))
    }
}

impl Persist for bool {
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        (*self as u8).write(writer)
    }

    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(invalid("invalid bool")),
        }
    }
}

impl Persist for char {
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        (*self as u32).write(writer)
    }

    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        char::from_u32(u32::read(reader)?).ok_or_else(|| invalid("invalid char"))
    }
}

impl Persist for () {
    fn write<W: Write>(&self, _writer: &mut W) -> Result<(), Error> {
        Ok(())
    }

    fn read<R: Read>(_reader: &mut R) -> Result<Self, Error> {
        Ok(())
    }
}

fn write_bytes<W: Write>(bytes: &[u8], writer: &mut W) -> Result<(), Error> {
    (bytes.len() as u64).write(writer)?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let len = u64::read(reader)?;

    // Don't trust the length for preallocation.
    let mut bytes = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut bytes)?;

    if (bytes.len() as u64) < len {
        return Err(Error::Truncated);
    }

    Ok(bytes)
}

impl Persist for Vec<u8> {
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        write_bytes(self, writer)
    }

    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        read_bytes(reader)
    }
}

impl Persist for String {
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        write_bytes(self.as_bytes(), writer)
    }

    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        String::from_utf8(read_bytes(reader)?).map_err(|_| invalid("invalid utf-8"))
    }
}

impl<T: Persist> Persist for Option<T> {
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        match self {
            None => false.write(writer),
            Some(value) => {
                true.write(writer)?;
                value.write(writer)
            }
        }
    }

    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        if bool::read(reader)? {
            Ok(Some(T::read(reader)?))
        } else {
            Ok(None)
        }
    }
}

impl<A: Persist, B: Persist> Persist for (A, B) {
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.write(writer)?;
        self.1.write(writer)
    }

    fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        Ok((A::read(reader)?, B::read(reader)?))
    }
}

fn write_header<W: Write>(count: usize, writer: &mut W) -> Result<(), Error> {
    writer.write_all(MAGIC)?;
    VERSION.write(writer)?;
    (count as u64).write(writer)
}

// Returns the number of records that follow the header.
fn read_header<R: Read>(reader: &mut R) -> Result<u64, Error> {
    let magic: [u8; 9] = read_array(reader)?;
    if &magic != MAGIC {
        return Err(Error::BadSignature);
    }

    match u8::read(reader)? {
        VERSION => {}
        version => return Err(Error::UnsupportedVersion(version)),
    }

    u64::read(reader)
}

impl<K, V, S> HashTable<K, V, S>
where
    K: Hash + Eq + Persist,
    V: Persist,
    S: BuildHasher,
{
    /// Writes the table to `writer`, returning the number of records written.
    ///
    /// Entries added or removed concurrently may or may not be saved.
    ///
    /// # Examples
    ///
    /// ```
    /// use hoptable::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.add(1u32, "one".to_owned());
    /// table.add(2u32, "two".to_owned());
    ///
    /// let mut bytes = Vec::new();
    /// assert_eq!(table.write_to(&mut bytes).unwrap(), 2);
    ///
    /// let copy: HashTable<u32, String> = HashTable::new();
    /// assert_eq!(copy.read_from(&bytes[..]).unwrap(), 2);
    /// assert_eq!(copy, table);
    /// ```
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<usize, Error> {
        let pinned = self.pin();

        // The header needs an exact count, so take a snapshot first.
        let records = pinned.iter().collect::<Vec<_>>();

        write_header(records.len(), &mut writer)?;
        for (key, value) in &records {
            key.write(&mut writer)?;
            value.write(&mut writer)?;
        }

        writer.flush()?;
        Ok(records.len())
    }

    /// Reads records written by [`write_to`](HashTable::write_to) into the
    /// table, returning the number of records newly added.
    ///
    /// Records whose keys are already present are skipped. If an error is
    /// returned, the records read before it remain in the table.
    pub fn read_from<R: Read>(&self, mut reader: R) -> Result<usize, Error> {
        let count = read_header(&mut reader)?;
        let mut added = 0;

        for _ in 0..count {
            let key = K::read(&mut reader)?;
            let value = V::read(&mut reader)?;

            if self.add(key, value) {
                added += 1;
            }
        }

        Ok(added)
    }

    /// Saves the table to the file at `path`, replacing its contents.
    ///
    /// Returns the number of records written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<usize, Error> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    /// Adds the records saved in the file at `path` to the table.
    ///
    /// Returns the number of records newly added.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<usize, Error> {
        self.read_from(BufReader::new(File::open(path)?))
    }
}

impl<K, S> HashSet<K, S>
where
    K: Hash + Eq + Persist,
    S: BuildHasher,
{
    /// Writes the set to `writer`, returning the number of keys written.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<usize, Error> {
        self.map.write_to(writer)
    }

    /// Reads keys written by [`write_to`](HashSet::write_to) into the set,
    /// returning the number of keys newly added.
    pub fn read_from<R: Read>(&self, reader: R) -> Result<usize, Error> {
        self.map.read_from(reader)
    }

    /// Saves the set to the file at `path`, replacing its contents.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<usize, Error> {
        self.map.save(path)
    }

    /// Adds the keys saved in the file at `path` to the set.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<usize, Error> {
        self.map.load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Persist>(value: &T) -> T {
        let mut bytes = Vec::new();
        value.write(&mut bytes).unwrap();
        T::read(&mut &bytes[..]).unwrap()
    }

    #[test]
    fn encodings() {
        let mut bytes = Vec::new();
        0x0102_0304u32.write(&mut bytes).unwrap();
        assert_eq!(bytes, [4, 3, 2, 1]);

        bytes.clear();
        7usize.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 8);

        bytes.clear();
        ().write(&mut bytes).unwrap();
        assert!(bytes.is_empty());

        bytes.clear();
        "hi".to_owned().write(&mut bytes).unwrap();
        assert_eq!(bytes, [2, 0, 0, 0, 0, 0, 0, 0, b'h', b'i']);
    }

    #[test]
    fn composites() {
        assert_eq!(round_trip(&Some(('x', -5i64))), Some(('x', -5i64)));
        assert_eq!(round_trip(&None::<String>), None);
        assert_eq!(round_trip(&vec![0u8, 255]), vec![0u8, 255]);
        assert!(round_trip(&true));
    }

    #[test]
    fn malformed() {
        assert!(matches!(bool::read(&mut &[2u8][..]), Err(Error::Io(_))));
        assert!(matches!(char::read(&mut &[0u8, 0xD8, 0, 0][..]), Err(Error::Io(_))));
        assert!(matches!(u64::read(&mut &[1u8, 2][..]), Err(Error::Truncated)));

        // A length prefix longer than the input.
        let bytes = [9u8, 0, 0, 0, 0, 0, 0, 0, b'a'];
        assert!(matches!(String::read(&mut &bytes[..]), Err(Error::Truncated)));
    }

    #[test]
    fn header() {
        let mut bytes = Vec::new();
        write_header(3, &mut bytes).unwrap();
        assert_eq!(&bytes[..9], MAGIC);
        assert_eq!(bytes[9], VERSION);
        assert_eq!(read_header(&mut &bytes[..]).unwrap(), 3);

        bytes[0] = b'X';
        assert!(matches!(read_header(&mut &bytes[..]), Err(Error::BadSignature)));

        bytes[0] = b'H';
        bytes[9] = 2;
        assert!(matches!(
            read_header(&mut &bytes[..]),
            Err(Error::UnsupportedVersion(2))
        ));

        assert!(matches!(read_header(&mut &bytes[..5]), Err(Error::Truncated)));
    }
}
