//! Column types, accessor paths and the partition schema.
//!
//! A [`Schema`] is an ordered list of [`ColumnDescriptor`]s. Column order is
//! significant: it fixes the order of buffers in a store and of columns on
//! the wire. Schemas are shared read-only (`Arc<Schema>`) between every store
//! built from them.
//!
//! # Encoding
//!
//! Schemas carry their own binary form, which the wire format embeds as-is:
//!
//! ```text
//! magic   "CSCH"              4 bytes
//! version u8                  currently 1
//! flags   u8                  bit 0: primitive
//! ncols   u32 BE
//! per column:
//!   type    u8                ColumnType tag
//!   nsegs   u16 BE
//!   per segment: len u16 BE, UTF-8 bytes
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Read, Write};

use crate::error::{PartitionError, Result};

const SCHEMA_MAGIC: &[u8; 4] = b"CSCH";
const SCHEMA_VERSION: u8 = 1;
const FLAG_PRIMITIVE: u8 = 0x01;

/// Fixed-width primitive column types. Values are little-endian in buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl ColumnType {
    pub const ALL: [ColumnType; 6] = [
        ColumnType::Byte,
        ColumnType::Short,
        ColumnType::Int,
        ColumnType::Long,
        ColumnType::Float,
        ColumnType::Double,
    ];

    /// Byte width of one element.
    pub fn bytes(self) -> usize {
        match self {
            ColumnType::Byte => 1,
            ColumnType::Short => 2,
            ColumnType::Int | ColumnType::Float => 4,
            ColumnType::Long | ColumnType::Double => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Byte => "byte",
            ColumnType::Short => "short",
            ColumnType::Int => "int",
            ColumnType::Long => "long",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
        }
    }

    /// Stable wire tag.
    pub fn tag(self) -> u8 {
        match self {
            ColumnType::Byte => 1,
            ColumnType::Short => 2,
            ColumnType::Int => 3,
            ColumnType::Long => 4,
            ColumnType::Float => 5,
            ColumnType::Double => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(ColumnType::Byte),
            2 => Ok(ColumnType::Short),
            3 => Ok(ColumnType::Int),
            4 => Ok(ColumnType::Long),
            5 => Ok(ColumnType::Float),
            6 => Ok(ColumnType::Double),
            other => Err(PartitionError::UnknownColumnType(other)),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded scalar, tagged with its column type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl ColumnValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValue::Byte(_) => ColumnType::Byte,
            ColumnValue::Short(_) => ColumnType::Short,
            ColumnValue::Int(_) => ColumnType::Int,
            ColumnValue::Long(_) => ColumnType::Long,
            ColumnValue::Float(_) => ColumnType::Float,
            ColumnValue::Double(_) => ColumnType::Double,
        }
    }
}

/// Field-selector steps from the root of a row to one scalar leaf.
///
/// The empty path addresses the row itself and is only meaningful for
/// primitive schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AccessorPath(Vec<String>);

impl AccessorPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Split a dotted path such as `quote.bid`. An empty string is the root.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        Self::new(dotted.split('.'))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for AccessorPath {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}

impl fmt::Display for AccessorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("<root>");
        }
        f.write_str(&self.0.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDescriptor {
    pub column_type: ColumnType,
    pub path: AccessorPath,
}

impl ColumnDescriptor {
    pub fn new(column_type: ColumnType, path: impl Into<AccessorPath>) -> Self {
        Self {
            column_type,
            path: path.into(),
        }
    }
}

/// Ordered column layout of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema {
    columns: Vec<ColumnDescriptor>,
    primitive: bool,
}

impl Schema {
    /// Schema for a row type with one column per scalar leaf.
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            columns,
            primitive: false,
        }
    }

    /// Schema for rows that are themselves a single scalar.
    pub fn primitive(column_type: ColumnType) -> Self {
        Self {
            columns: vec![ColumnDescriptor::new(column_type, AccessorPath::root())],
            primitive: true,
        }
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn is_primitive(&self) -> bool {
        self.primitive
    }

    /// Bytes of one row across all columns.
    pub fn row_width(&self) -> usize {
        self.columns.iter().map(|c| c.column_type.bytes()).sum()
    }

    /// Total buffer bytes for `row_count` rows. Saturates rather than wraps.
    pub fn memory_usage(&self, row_count: usize) -> u64 {
        self.columns
            .iter()
            .map(|c| (c.column_type.bytes() as u64).saturating_mul(row_count as u64))
            .fold(0u64, u64::saturating_add)
    }

    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        out.write_all(SCHEMA_MAGIC)?;
        out.write_u8(SCHEMA_VERSION)?;
        out.write_u8(if self.primitive { FLAG_PRIMITIVE } else { 0 })?;

        let ncols = u32::try_from(self.columns.len())
            .map_err(|_| PartitionError::invalid_schema("too many columns"))?;
        out.write_u32::<BigEndian>(ncols)?;

        for column in &self.columns {
            out.write_u8(column.column_type.tag())?;
            let segments = column.path.segments();
            let nsegs = u16::try_from(segments.len())
                .map_err(|_| PartitionError::invalid_schema("accessor path too long"))?;
            out.write_u16::<BigEndian>(nsegs)?;
            for segment in segments {
                let len = u16::try_from(segment.len()).map_err(|_| {
                    PartitionError::invalid_schema(format!("path segment of {} bytes", segment.len()))
                })?;
                out.write_u16::<BigEndian>(len)?;
                out.write_all(segment.as_bytes())?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != SCHEMA_MAGIC {
            return Err(PartitionError::invalid_schema(format!("bad magic {:02x?}", magic)));
        }
        let version = input.read_u8()?;
        if version != SCHEMA_VERSION {
            return Err(PartitionError::invalid_schema(format!(
                "unsupported version {}",
                version
            )));
        }
        let primitive = input.read_u8()? & FLAG_PRIMITIVE != 0;
        let ncols = input.read_u32::<BigEndian>()?;

        let mut columns = Vec::new();
        for _ in 0..ncols {
            let column_type = ColumnType::from_tag(input.read_u8()?)?;
            let nsegs = input.read_u16::<BigEndian>()?;
            let mut segments = Vec::with_capacity(nsegs as usize);
            for _ in 0..nsegs {
                let len = input.read_u16::<BigEndian>()? as usize;
                let mut bytes = vec![0u8; len];
                input.read_exact(&mut bytes)?;
                let segment = String::from_utf8(bytes)
                    .map_err(|_| PartitionError::invalid_schema("path segment is not UTF-8"))?;
                segments.push(segment);
            }
            columns.push(ColumnDescriptor::new(column_type, AccessorPath(segments)));
        }

        if primitive && (columns.len() != 1 || !columns[0].path.is_root()) {
            return Err(PartitionError::invalid_schema(
                "primitive schema must have exactly one root column",
            ));
        }
        Ok(Self { columns, primitive })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade_schema() -> Schema {
        Schema::new(vec![
            ColumnDescriptor::new(ColumnType::Long, "id"),
            ColumnDescriptor::new(ColumnType::Double, "quote.bid"),
            ColumnDescriptor::new(ColumnType::Short, "venue"),
        ])
    }

    #[test]
    fn byte_widths() {
        let widths: Vec<usize> = ColumnType::ALL.iter().map(|t| t.bytes()).collect();
        assert_eq!(widths, vec![1, 2, 4, 8, 4, 8]);
    }

    #[test]
    fn tags_are_stable() {
        for ty in ColumnType::ALL {
            assert_eq!(ColumnType::from_tag(ty.tag()).unwrap(), ty);
        }
        assert!(matches!(
            ColumnType::from_tag(0),
            Err(PartitionError::UnknownColumnType(0))
        ));
    }

    #[test]
    fn memory_usage_sums_columns() {
        let schema = trade_schema();
        assert_eq!(schema.row_width(), 18);
        assert_eq!(schema.memory_usage(10), 180);
        assert_eq!(schema.memory_usage(0), 0);
    }

    #[test]
    fn dotted_paths() {
        let path = AccessorPath::parse("quote.bid");
        assert_eq!(path.segments(), &["quote".to_string(), "bid".to_string()]);
        assert_eq!(path.to_string(), "quote.bid");
        assert!(AccessorPath::parse("").is_root());
    }

    #[test]
    fn encoding_round_trips() {
        for schema in [trade_schema(), Schema::primitive(ColumnType::Float)] {
            let mut bytes = Vec::new();
            schema.write_to(&mut bytes).unwrap();
            let decoded = Schema::read_from(&mut bytes.as_slice()).unwrap();
            assert_eq!(decoded, schema);
        }
    }

    #[test]
    fn rejects_bad_magic_and_unknown_type() {
        let mut bytes = Vec::new();
        trade_schema().write_to(&mut bytes).unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            Schema::read_from(&mut bad_magic.as_slice()),
            Err(PartitionError::InvalidSchema { .. })
        ));

        // First column tag sits right after magic, version, flags and count.
        let mut bad_type = bytes;
        bad_type[10] = 42;
        assert!(matches!(
            Schema::read_from(&mut bad_type.as_slice()),
            Err(PartitionError::UnknownColumnType(42))
        ));
    }
}
