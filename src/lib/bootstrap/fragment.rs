//! Lenient reader for the markup fragments found in an XML dump.
//!
//! Fragments are cut out of the dump line by line, so they are often not
//! well formed on their own. Unbalanced closing tags are ignored and an
//! unterminated tag ends the fragment.

/// Element of a fragment with its attributes and the text directly inside it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// `None` for self-closing and unclosed elements.
    pub text: Option<String>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, value)| value.as_str())
    }

    /// Marked with `xsi:nil="true"`, the way dumps express SQL NULL.
    pub fn is_nil(&self) -> bool {
        self.attribute("xsi:nil") == Some("true")
    }
}

/// Every element of the fragment in document order.
pub fn parse_fragment(input: &str) -> Vec<Element> {
    let mut elements: Vec<Element> = Vec::new();
    let mut open: Vec<(usize, String)> = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find('<') {
        let text = &rest[..start];
        if let Some((_, buffer)) = open.last_mut() {
            buffer.push_str(text);
        }
        rest = &rest[start..];

        let skip = if rest.starts_with("<!--") {
            rest.find("-->").map(|end| end + 3)
        } else if rest.starts_with("<?") {
            rest.find("?>").map(|end| end + 2)
        } else if rest.starts_with("<!") {
            rest.find('>').map(|end| end + 1)
        } else {
            None
        };

        if let Some(skip) = skip {
            rest = &rest[skip..];
            continue;
        }

        let end = match tag_end(rest) {
            Some(end) => end,
            None => break,
        };

        let tag = &rest[1..end];
        rest = &rest[end + 1..];

        if let Some(name) = tag.strip_prefix('/') {
            close(&mut elements, &mut open, name.trim());
            continue;
        }

        let self_closing = tag.ends_with('/');
        let tag = tag.trim_end_matches('/');
        let (name, attributes) = split_tag(tag);

        if name.is_empty() {
            continue;
        }

        elements.push(Element {
            name: name.to_owned(),
            attributes: parse_attributes(attributes),
            text: None,
        });

        if !self_closing {
            open.push((elements.len() - 1, String::new()));
        }
    }

    elements
}

fn close(elements: &mut [Element], open: &mut Vec<(usize, String)>, name: &str) {
    let position = match open
        .iter()
        .rposition(|(index, _)| elements[*index].name == name)
    {
        Some(position) => position,
        None => return,
    };

    for (index, text) in open.drain(position..).rev() {
        if elements[index].name == name {
            elements[index].text = Some(decode_entities(&text));
        }
    }
}

/// Index of the `>` ending the tag, skipping over quoted attribute values.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;

    for (index, character) in tag.char_indices().skip(1) {
        match (quote, character) {
            (None, '"' | '\'') => quote = Some(character),
            (Some(open), character) if open == character => quote = None,
            (None, '>') => return Some(index),
            _ => {}
        }
    }

    None
}

fn split_tag(tag: &str) -> (&str, &str) {
    let tag = tag.trim();

    match tag.find(char::is_whitespace) {
        Some(index) => (&tag[..index], &tag[index..]),
        None => (tag, ""),
    }
}

fn parse_attributes(input: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut rest = input.trim_start();

    while !rest.is_empty() {
        let equals = match rest.find('=') {
            Some(equals) => equals,
            None => break,
        };

        let name = rest[..equals].trim();
        let value = rest[equals + 1..].trim_start();

        let quote = match value.chars().next() {
            Some(quote @ ('"' | '\'')) => quote,
            _ => break,
        };

        let value = &value[1..];
        let end = match value.find(quote) {
            Some(end) => end,
            None => break,
        };

        if !name.is_empty() && !name.contains(char::is_whitespace) {
            attributes.push((name.to_owned(), decode_entities(&value[..end])));
        }

        rest = value[end + 1..].trim_start();
    }

    attributes
}

/// Replaces predefined and numeric character references, unknown ones are kept.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_owned();
    }

    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('&') {
        output.push_str(&rest[..start]);
        rest = &rest[start..];

        let decoded = rest.find(';').and_then(|end| {
            let entity = &rest[1..end];
            let character = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };

            character.map(|character| (character, end))
        });

        match decoded {
            Some((character, end)) => {
                output.push(character);
                rest = &rest[end + 1..];
            }
            None => {
                output.push('&');
                rest = &rest[1..];
            }
        }
    }

    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_row_fields_with_text_and_nil() {
        let elements = parse_fragment(
            r#"<row>
                <field name="id">5</field>
                <field name="note" xsi:nil="true" />
                <field name="empty"></field>
            </row>"#,
        );

        let fields: Vec<_> = elements
            .iter()
            .filter(|element| element.name == "field")
            .map(|field| {
                (
                    field.attribute("name").unwrap().to_owned(),
                    field.is_nil(),
                    field.text.clone(),
                )
            })
            .collect();

        assert_eq!(
            fields,
            vec![
                ("id".to_owned(), false, Some("5".to_owned())),
                ("note".to_owned(), true, None),
                ("empty".to_owned(), false, Some(String::new())),
            ]
        );
    }

    #[test]
    fn reads_structure_attributes() {
        let elements = parse_fragment(
            r#"<table_structure name="orders">
                <field Field="id" Type="int(11)" Null="NO" Key="PRI" Extra="auto_increment" Comment="" />
                <key Table="orders" Non_unique="0" Key_name="PRIMARY" />
            </table_structure>"#,
        );

        assert_eq!(elements[0].attribute("name"), Some("orders"));
        assert_eq!(
            elements[1].attributes,
            vec![
                ("Field".to_owned(), "id".to_owned()),
                ("Type".to_owned(), "int(11)".to_owned()),
                ("Null".to_owned(), "NO".to_owned()),
                ("Key".to_owned(), "PRI".to_owned()),
                ("Extra".to_owned(), "auto_increment".to_owned()),
                ("Comment".to_owned(), String::new()),
            ]
        );
        assert_eq!(elements[2].name, "key");
    }

    #[test]
    fn decodes_entities_in_text_and_attributes() {
        let elements =
            parse_fragment(r#"<field name="a&amp;b">x &lt; y &#38; z &#x41; &unknown;</field>"#);

        assert_eq!(elements[0].attribute("name"), Some("a&b"));
        assert_eq!(elements[0].text.as_deref(), Some("x < y & z A &unknown;"));
    }

    #[test]
    fn tolerates_comments_and_quoted_angle_brackets() {
        let elements = parse_fragment(
            r#"<!-- dump --><field name="cmp" Comment="a > b">1</field></unbalanced>"#,
        );

        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].attribute("Comment"), Some("a > b"));
        assert_eq!(elements[0].text.as_deref(), Some("1"));
    }

    #[test]
    fn stops_at_unterminated_tag() {
        let elements = parse_fragment(r#"<field name="id">1</field><field name="broken"#);

        assert_eq!(elements.len(), 1);
    }
}
