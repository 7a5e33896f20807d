//! Binding between Rust row types and column descriptors.
//!
//! A row type describes itself through [`ColumnarRow`]: the schema it
//! produces, how to make a blank instance, and a get/set pair for every
//! accessor path it understands. The pairs are plain function pointers fixed
//! at compile time, so decoding never walks a path at runtime.
//!
//! Flat structs get an implementation from [`columnar_row!`]. Nested rows are
//! written by hand; their setters create intermediate holders on demand:
//!
//! ```ignore
//! set: |row: &mut Trade, value| {
//!     if let Some(bid) = f64::from_value(value) {
//!         row.quote.get_or_insert_with(Quote::blank).bid = bid;
//!     }
//! }
//! ```

use crate::schema::{AccessorPath, ColumnType, ColumnValue, Schema};

/// Rust scalars that map one-to-one onto a [`ColumnType`].
pub trait ColumnScalar: Copy {
    const COLUMN_TYPE: ColumnType;
    const ZERO: Self;

    fn into_value(self) -> ColumnValue;
    fn from_value(value: ColumnValue) -> Option<Self>;
}

macro_rules! impl_column_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ColumnScalar for $ty {
                const COLUMN_TYPE: ColumnType = ColumnType::$variant;
                const ZERO: Self = 0 as $ty;

                #[inline]
                fn into_value(self) -> ColumnValue {
                    ColumnValue::$variant(self)
                }

                #[inline]
                fn from_value(value: ColumnValue) -> Option<Self> {
                    match value {
                        ColumnValue::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }

            impl ColumnarRow for $ty {
                fn schema() -> Schema {
                    Schema::primitive(ColumnType::$variant)
                }

                fn blank() -> Self {
                    <$ty as ColumnScalar>::ZERO
                }

                fn accessor(path: &AccessorPath) -> Option<ColumnAccessor<Self>> {
                    path.is_root().then(|| {
                        ColumnAccessor::<Self>::new(
                            ColumnType::$variant,
                            |row: &Self| ColumnScalar::into_value(*row),
                            |row: &mut Self, value| {
                                if let Some(v) = <$ty as ColumnScalar>::from_value(value) {
                                    *row = v;
                                }
                            },
                        )
                    })
                }

                fn primitive_type() -> Option<ColumnType> {
                    Some(ColumnType::$variant)
                }

                fn from_scalar(value: ColumnValue) -> Option<Self> {
                    <$ty as ColumnScalar>::from_value(value)
                }
            }
        )*
    };
}

impl_column_scalar! {
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
}

/// Compile-time get/set pair for one column of row type `T`.
pub struct ColumnAccessor<T> {
    pub column_type: ColumnType,
    pub get: fn(&T) -> ColumnValue,
    pub set: fn(&mut T, ColumnValue),
}

impl<T> ColumnAccessor<T> {
    pub fn new(
        column_type: ColumnType,
        get: fn(&T) -> ColumnValue,
        set: fn(&mut T, ColumnValue),
    ) -> Self {
        Self {
            column_type,
            get,
            set,
        }
    }
}

impl<T> Clone for ColumnAccessor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ColumnAccessor<T> {}

/// A row type that can be stored column-wise.
pub trait ColumnarRow: Sized {
    /// Column layout this type produces when stored.
    fn schema() -> Schema;

    /// An instance with every leaf at its zero value and optional holders
    /// empty. Decoding overwrites every column leaf afterwards.
    fn blank() -> Self;

    /// Get/set pair for the leaf at `path`, if the type has one.
    fn accessor(path: &AccessorPath) -> Option<ColumnAccessor<Self>>;

    /// Column type when the row is itself a scalar.
    fn primitive_type() -> Option<ColumnType> {
        None
    }

    /// Build a primitive row straight from its scalar.
    fn from_scalar(_value: ColumnValue) -> Option<Self> {
        None
    }
}

/// Implement [`ColumnarRow`] for a struct whose fields are all scalars.
///
/// Columns follow field declaration order, each addressed by the field name.
///
/// ```ignore
/// struct Point { x: i32, y: f64 }
/// columnar_row!(Point { x: i32, y: f64 });
/// ```
#[macro_export]
macro_rules! columnar_row {
    ($row:ident { $($field:ident : $ty:ty),+ $(,)? }) => {
        impl $crate::ColumnarRow for $row {
            fn schema() -> $crate::Schema {
                $crate::Schema::new(vec![
                    $(
                        $crate::ColumnDescriptor::new(
                            <$ty as $crate::ColumnScalar>::COLUMN_TYPE,
                            stringify!($field),
                        ),
                    )+
                ])
            }

            fn blank() -> Self {
                Self {
                    $($field: <$ty as $crate::ColumnScalar>::ZERO,)+
                }
            }

            fn accessor(
                path: &$crate::AccessorPath,
            ) -> Option<$crate::ColumnAccessor<Self>> {
                match path.segments() {
                    $(
                        [name] if name.as_str() == stringify!($field) => {
                            Some($crate::ColumnAccessor::<Self>::new(
                                <$ty as $crate::ColumnScalar>::COLUMN_TYPE,
                                |row: &Self| $crate::ColumnScalar::into_value(row.$field),
                                |row: &mut Self, value| {
                                    if let Some(v) = <$ty as $crate::ColumnScalar>::from_value(value) {
                                        row.$field = v;
                                    }
                                },
                            ))
                        }
                    )+
                    _ => None,
                }
            }
        }
    };
}
