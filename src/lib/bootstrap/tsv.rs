//! Tab-delimited export format used by the bulk path.
//!
//! First line holds the column names. `\N` stands for NULL, tabs, newlines,
//! carriage returns and backslashes inside values are backslash escaped.

pub const NULL_MARKER: &str = "\\N";

pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for character in value.chars() {
        match character {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            character => escaped.push(character),
        }
    }

    escaped
}

pub fn unescape(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut characters = value.chars();

    while let Some(character) = characters.next() {
        if character != '\\' {
            unescaped.push(character);
            continue;
        }

        match characters.next() {
            Some('t') => unescaped.push('\t'),
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some(other) => unescaped.push(other),
            None => unescaped.push('\\'),
        }
    }

    unescaped
}

pub fn format_line<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> String {
    let mut line = values
        .into_iter()
        .map(|value| match value {
            Some(value) => escape(value),
            None => NULL_MARKER.to_owned(),
        })
        .collect::<Vec<_>>()
        .join("\t");

    line.push('\n');
    line
}

pub fn parse_line(line: &str) -> Vec<Option<String>> {
    line.split('\t')
        .map(|value| match value {
            NULL_MARKER => None,
            value => Some(unescape(value)),
        })
        .collect()
}
