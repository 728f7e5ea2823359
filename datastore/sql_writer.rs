use std::fmt::{self, Write};
use sqlx::any::AnyKind;

/// Helper struct for generating SQL statements.
#[derive(Debug)]
pub struct SqlWriter {
    kind: AnyKind,
    text: String,
}

/// An SQL identifier that is written quoted.
#[derive(Debug, Copy, Clone)]
pub struct Name<'a>(pub &'a str);

impl SqlWriter {
    pub fn new(kind: AnyKind) -> Self {
        Self { kind, text: String::new() }
    }

    pub fn kind(&self) -> AnyKind {
        self.kind
    }

    /// Overloaded helper method that calls a `write_*` method depending on the type `T`.
    pub fn write<T: WriteSql + ?Sized>(&mut self, x: &T) {
        x.write_sql(self);
    }

    /// Appends the string verbatim into the SQL statement.
    pub fn write_str(&mut self, x: &str) {
        self.text.push_str(x);
    }

    /// Appends the name as a quoted identifier into the SQL statement.
    pub fn write_name(&mut self, name: &str) {
        write_quoted(&mut self.text, '"', name);
    }

    /// Appends a comma-separated, parenthesized list of quoted identifiers.
    pub fn write_names<S: AsRef<str>>(&mut self, names: &[S]) {
        self.text.push('(');
        for (i, name) in names.iter().enumerate() {
            if i != 0 {
                self.text.push_str(", ");
            }
            self.write_name(name.as_ref());
        }
        self.text.push(')');
    }

    /// Appends a string literal.
    pub fn write_literal_str(&mut self, value: &str) {
        write_quoted(&mut self.text, '\'', value);
    }

    /// Appends a numeric literal. The value must be finite.
    pub fn write_literal_f64(&mut self, value: f64) {
        debug_assert!(value.is_finite());
        if value.fract() == 0.0 && value.abs() < 1e15 {
            // keep a decimal point, so that the literal is not parsed as an integer
            write!(self, "{:.1}", value);
        } else {
            write!(self, "{:e}", value);
        }
    }

    /// This method makes the `write!` macro work with this struct.
    pub fn write_fmt(&mut self, fmt: fmt::Arguments<'_>) {
        // writing into a String cannot fail
        let _ = self.text.write_fmt(fmt);
    }

    /// Returns the produced SQL statement.
    pub fn build(self) -> String {
        self.text
    }
}

fn write_quoted(out: &mut String, quote: char, x: &str) {
    out.reserve(2 + x.len());
    out.push(quote);
    for c in x.chars() {
        if c == quote {
            out.push(quote);
        }
        out.push(c);
    }
    out.push(quote);
}

pub trait WriteSql {
    fn write_sql(&self, writer: &mut SqlWriter);
}

impl WriteSql for str {
    fn write_sql(&self, writer: &mut SqlWriter) {
        writer.write_str(self);
    }
}

impl WriteSql for Name<'_> {
    fn write_sql(&self, writer: &mut SqlWriter) {
        writer.write_name(self.0);
    }
}
