//! Rewrites application SQL into the driver's positional `?` form.
//!
//! Two placeholder styles are recognised:
//! - named: `@name` outside single-quoted literals, rewritten to `?` and mapped
//!   to the parameter with that name;
//! - positional: `?` already present in the text, mapped `0..n` in order.

use crate::error::SqlBridgeError;

/// Placeholder style a template was compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderMode {
    Named,
    Positional,
}

/// Compiled, immutable rewrite of one SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementTemplate {
    source_sql: String,
    rewritten_sql: String,
    slot_to_param_index: Vec<usize>,
    mode: PlaceholderMode,
}

impl StatementTemplate {
    /// The SQL text as supplied by the application.
    #[must_use]
    pub fn source_sql(&self) -> &str {
        &self.source_sql
    }

    /// The SQL handed to the driver.
    #[must_use]
    pub fn rewritten_sql(&self) -> &str {
        &self.rewritten_sql
    }

    /// Entry `i` is the parameter index bound at native ordinal `i + 1`.
    #[must_use]
    pub fn slot_to_param_index(&self) -> &[usize] {
        &self.slot_to_param_index
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_to_param_index.len()
    }

    #[must_use]
    pub fn mode(&self) -> PlaceholderMode {
        self.mode
    }
}

/// Whether `sql` contains an `@` outside single-quoted literals.
#[must_use]
pub fn has_named_placeholders(sql: &str) -> bool {
    let mut in_quote = false;
    for c in sql.chars() {
        match c {
            '@' if !in_quote => return true,
            '\'' => in_quote = !in_quote,
            _ => {}
        }
    }
    false
}

/// Placeholder style for `sql`; named detection can be switched off per command.
#[must_use]
pub fn detect_mode(sql: &str, named_detection: bool) -> PlaceholderMode {
    if named_detection && has_named_placeholders(sql) {
        PlaceholderMode::Named
    } else {
        PlaceholderMode::Positional
    }
}

/// Compile `sql` in the given mode. `lookup` maps a placeholder name (without
/// the `@`) to an index in the caller's parameter list.
///
/// # Errors
/// Returns `SqlBridgeError::MissingParameter` if a named placeholder has no
/// matching parameter.
pub fn compile<F>(
    sql: &str,
    mode: PlaceholderMode,
    lookup: F,
) -> Result<StatementTemplate, SqlBridgeError>
where
    F: Fn(&str) -> Option<usize>,
{
    match mode {
        PlaceholderMode::Named => compile_named(sql, lookup),
        PlaceholderMode::Positional => Ok(compile_positional(sql)),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn compile_named<F>(sql: &str, lookup: F) -> Result<StatementTemplate, SqlBridgeError>
where
    F: Fn(&str) -> Option<usize>,
{
    let mut rewritten = String::with_capacity(sql.len());
    let mut slots = Vec::new();
    let mut in_quote = false;
    let mut chars = sql.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                rewritten.push(c);
            }
            '@' if !in_quote => {
                let start = idx + c.len_utf8();
                let mut end = start;
                while let Some(&(next_idx, next)) = chars.peek() {
                    if !is_name_char(next) {
                        break;
                    }
                    end = next_idx + next.len_utf8();
                    chars.next();
                }
                if end == start {
                    // A bare `@` is literal text.
                    rewritten.push(c);
                    continue;
                }
                let name = &sql[start..end];
                let index =
                    lookup(name).ok_or_else(|| SqlBridgeError::MissingParameter(name.to_string()))?;
                slots.push(index);
                rewritten.push('?');
            }
            _ => rewritten.push(c),
        }
    }

    Ok(StatementTemplate {
        source_sql: sql.to_string(),
        rewritten_sql: rewritten,
        slot_to_param_index: slots,
        mode: PlaceholderMode::Named,
    })
}

fn compile_positional(sql: &str) -> StatementTemplate {
    // Quote-unaware on purpose: a `?` inside a literal still counts.
    let count = sql.matches('?').count();
    StatementTemplate {
        source_sql: sql.to_string(),
        rewritten_sql: sql.to_string(),
        slot_to_param_index: (0..count).collect(),
        mode: PlaceholderMode::Positional,
    }
}

/// Heuristic used by `execute_reader` to run a statement as an update.
///
/// True when the trimmed, lower-cased text starts with `insert` or `update`
/// and contains no `;` other than a single trailing one. Statements such as
/// `UPDATE ... RETURNING` or multi-statement batches are misclassified.
#[must_use]
pub fn is_update_statement(sql: &str) -> bool {
    let low = sql.trim().to_lowercase();
    let single_statement = match low.find(';') {
        None => true,
        Some(idx) => idx == low.len() - 1,
    };
    (low.starts_with("insert") || low.starts_with("update")) && single_statement
}
