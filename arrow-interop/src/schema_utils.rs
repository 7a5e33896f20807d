use anyhow::{bail, Result};
use arrow_schema::{DataType, Field, Schema as ArrowSchema};
use columnar_core::{AccessorPath, ColumnDescriptor, ColumnType, Schema};
use std::collections::HashMap;

/// Schema metadata key marking a single-scalar row type.
pub const PRIMITIVE_METADATA_KEY: &str = "columnar.primitive";

/// Field name used for the root column of a primitive schema.
pub const PRIMITIVE_FIELD_NAME: &str = "value";

/// Map an Arrow `DataType` onto a column type. Only exact-width signed
/// integers and floats qualify; nothing is widened.
pub fn column_type_from_arrow(dt: &DataType) -> Result<ColumnType> {
    match dt {
        DataType::Int8 => Ok(ColumnType::Byte),
        DataType::Int16 => Ok(ColumnType::Short),
        DataType::Int32 => Ok(ColumnType::Int),
        DataType::Int64 => Ok(ColumnType::Long),
        DataType::Float32 => Ok(ColumnType::Float),
        DataType::Float64 => Ok(ColumnType::Double),
        other => bail!("Unsupported Arrow DataType for a columnar store: {:?}", other),
    }
}

pub fn column_type_to_arrow(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Byte => DataType::Int8,
        ColumnType::Short => DataType::Int16,
        ColumnType::Int => DataType::Int32,
        ColumnType::Long => DataType::Int64,
        ColumnType::Float => DataType::Float32,
        ColumnType::Double => DataType::Float64,
    }
}

/// Arrow schema with one non-nullable field per column, named by its dotted
/// accessor path.
pub fn to_arrow_schema(schema: &Schema) -> ArrowSchema {
    let fields: Vec<Field> = schema
        .columns()
        .iter()
        .map(|column| {
            let name = if column.path.is_root() {
                PRIMITIVE_FIELD_NAME.to_string()
            } else {
                column.path.to_string()
            };
            Field::new(name, column_type_to_arrow(column.column_type), false)
        })
        .collect();

    let mut metadata = HashMap::new();
    if schema.is_primitive() {
        metadata.insert(PRIMITIVE_METADATA_KEY.to_string(), "true".to_string());
    }
    ArrowSchema::new_with_metadata(fields, metadata)
}

pub trait SchemaExt {
    /// Columnar schema with one column per field, paths split on `.`.
    fn to_columnar(&self) -> Result<Schema>;
    fn is_columnar_compatible(&self) -> bool;
}

impl SchemaExt for ArrowSchema {
    fn to_columnar(&self) -> Result<Schema> {
        let primitive = self
            .metadata()
            .get(PRIMITIVE_METADATA_KEY)
            .is_some_and(|v| v == "true");

        if primitive {
            if self.fields().len() != 1 {
                bail!("Primitive schema must have exactly one field, got {}", self.fields().len());
            }
            let column_type = column_type_from_arrow(self.field(0).data_type())?;
            return Ok(Schema::primitive(column_type));
        }

        let columns = self
            .fields()
            .iter()
            .map(|field| {
                let column_type = column_type_from_arrow(field.data_type())?;
                Ok(ColumnDescriptor::new(column_type, AccessorPath::parse(field.name())))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(columns))
    }

    fn is_columnar_compatible(&self) -> bool {
        self.fields()
            .iter()
            .all(|f| column_type_from_arrow(f.data_type()).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mapping_is_exact() {
        for ty in ColumnType::ALL {
            assert_eq!(column_type_from_arrow(&column_type_to_arrow(ty)).unwrap(), ty);
        }
        assert!(column_type_from_arrow(&DataType::UInt32).is_err());
        assert!(column_type_from_arrow(&DataType::Utf8).is_err());
    }

    #[test]
    fn test_nested_paths_survive() {
        let schema = Schema::new(vec![
            ColumnDescriptor::new(ColumnType::Long, "id"),
            ColumnDescriptor::new(ColumnType::Double, "quote.bid"),
        ]);
        let arrow = to_arrow_schema(&schema);
        assert_eq!(arrow.field(1).name(), "quote.bid");
        assert!(!arrow.field(1).is_nullable());
        assert_eq!(arrow.to_columnar().unwrap(), schema);
    }

    #[test]
    fn test_primitive_flag_survives() {
        let schema = Schema::primitive(ColumnType::Short);
        let arrow = to_arrow_schema(&schema);
        assert_eq!(arrow.field(0).name(), PRIMITIVE_FIELD_NAME);
        assert_eq!(arrow.to_columnar().unwrap(), schema);
    }

    #[test]
    fn test_compatibility() {
        let ok = ArrowSchema::new(vec![Field::new("a", DataType::Int64, false)]);
        let bad = ArrowSchema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("s", DataType::Utf8, false),
        ]);
        assert!(ok.is_columnar_compatible());
        assert!(!bad.is_columnar_compatible());
        assert!(bad.to_columnar().is_err());
    }
}
