#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Int64,
}

impl Type {
    /// Size of a cell of this type on disk, in bytes.
    pub fn get_disk_size(&self) -> usize {
        match self {
            Type::Int64 => 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub t: Type,
}

impl Field {
    pub fn new(name: &str, t: Type) -> Self {
        Self {
            name: name.to_string(),
            t,
        }
    }
}

/// The shape of the rows of a single table. All fields are fixed
/// width, so every tuple of a table occupies the same number of
/// bytes on a page.
#[derive(Debug, Clone)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn small_int_schema(width: usize) -> Self {
        let mut fields: Vec<Field> = Vec::new();
        for i in 0..width {
            fields.push(Field::new(&format!("int-column-{}", i), Type::Int64));
        }

        Self::new(fields)
    }

    /// Get tuple size in bytes.
    pub fn get_tuple_size(&self) -> usize {
        self.fields.iter().map(|f| f.t.get_disk_size()).sum()
    }
}
