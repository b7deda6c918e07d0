//! Positional segment model with ER7 encoding.
//!
//! A segment is a named list of fields; each field holds repetitions and each repetition holds
//! components. Positions are 1-based as in the HL7 standard (`OBX-5` is field 5, `CWE.2` is
//! component 2). Values are stored unescaped and escaped on encoding.

use crate::{Hl7Error, Hl7Result};

/// Highest field position a segment accepts.
const MAX_FIELDS: usize = 256;

/// Highest component position a field accepts.
const MAX_COMPONENTS: usize = 64;

/// Delimiters of an ER7 message (MSH-1 and MSH-2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Encoding {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Encoding {
    /// The MSH-2 encoding characters, `^~\&` by default.
    pub fn characters(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .collect()
    }

    /// Derive the delimiters from the start of an MSH segment.
    pub fn from_msh(line: &str) -> Hl7Result<Self> {
        let mut chars = line.chars().skip(3);
        let field = chars.next();
        let encoding: Vec<char> = chars.take(4).collect();
        match (field, encoding.as_slice()) {
            (Some(field), [component, repetition, escape, subcomponent]) => Ok(Self {
                field,
                component: *component,
                repetition: *repetition,
                escape: *escape,
                subcomponent: *subcomponent,
            }),
            _ => Err(Hl7Error::InvalidSegment(
                "MSH segment too short to extract separators".into(),
            )),
        }
    }

    pub fn escape(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            let code = if c == self.escape {
                Some('E')
            } else if c == self.field {
                Some('F')
            } else if c == self.component {
                Some('S')
            } else if c == self.repetition {
                Some('R')
            } else if c == self.subcomponent {
                Some('T')
            } else {
                None
            };
            match code {
                Some(code) => {
                    out.push(self.escape);
                    out.push(code);
                    out.push(self.escape);
                }
                None => out.push(c),
            }
        }
        out
    }

    pub fn unescape(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find(self.escape) {
            out.push_str(&rest[..start]);
            let after = &rest[start + self.escape.len_utf8()..];
            let replaced = after.find(self.escape).and_then(|end| {
                let c = match &after[..end] {
                    "E" => self.escape,
                    "F" => self.field,
                    "S" => self.component,
                    "R" => self.repetition,
                    "T" => self.subcomponent,
                    _ => return None,
                };
                Some((c, &after[end + self.escape.len_utf8()..]))
            });
            match replaced {
                Some((c, tail)) => {
                    out.push(c);
                    rest = tail;
                }
                None => {
                    out.push(self.escape);
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

type Repetition = Vec<String>;
type Field = Vec<Repetition>;

/// A single HL7 segment such as `OBX` or `PID`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    name: String,
    fields: Vec<Field>,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the first component of the first repetition of a field.
    pub fn set(&mut self, field: usize, value: impl Into<String>) -> Hl7Result<()> {
        self.set_repetition_component(field, 0, 1, value)
    }

    /// Set a component of the first repetition of a field.
    pub fn set_component(
        &mut self,
        field: usize,
        component: usize,
        value: impl Into<String>,
    ) -> Hl7Result<()> {
        self.set_repetition_component(field, 0, component, value)
    }

    /// Set a component of a given repetition (0-based) of a field, growing the field as needed.
    pub fn set_repetition_component(
        &mut self,
        field: usize,
        repetition: usize,
        component: usize,
        value: impl Into<String>,
    ) -> Hl7Result<()> {
        let slot = self.slot_mut(field, repetition, component)?;
        *slot = value.into();
        Ok(())
    }

    /// Insert an empty repetition at `repetition`, shifting later repetitions back.
    pub fn insert_repetition(&mut self, field: usize, repetition: usize) -> Hl7Result<()> {
        let reps = self.field_mut(field)?;
        let at = repetition.min(reps.len());
        reps.insert(at, Vec::new());
        Ok(())
    }

    /// Component of the first repetition of a field.
    pub fn get(&self, field: usize, component: usize) -> Option<&str> {
        self.get_repetition(field, 0, component)
    }

    pub fn get_repetition(&self, field: usize, repetition: usize, component: usize) -> Option<&str> {
        let value = self
            .fields
            .get(field.checked_sub(1)?)?
            .get(repetition)?
            .get(component.checked_sub(1)?)?;
        (!value.is_empty()).then_some(value.as_str())
    }

    /// Number of repetitions present in a field.
    pub fn repetitions(&self, field: usize) -> usize {
        field
            .checked_sub(1)
            .and_then(|idx| self.fields.get(idx))
            .map_or(0, Vec::len)
    }

    /// Encode the segment as one ER7 line (without the segment terminator).
    pub fn encode(&self, encoding: &Encoding) -> String {
        let mut out = self.name.clone();
        let is_msh = self.name == "MSH";

        let mut encoded: Vec<String> = self
            .fields
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                let position = idx + 1;
                if is_msh && position == 2 {
                    encoding.characters()
                } else {
                    encode_field(field, encoding)
                }
            })
            .collect();
        if is_msh {
            // MSH-1 is the field separator itself.
            if encoded.len() < 2 {
                encoded.resize(2, String::new());
                encoded[1] = encoding.characters();
            }
            encoded.remove(0);
        }
        while encoded.last().is_some_and(String::is_empty) {
            encoded.pop();
        }

        for field in encoded {
            out.push(encoding.field);
            out.push_str(&field);
        }
        out
    }

    /// Parse one ER7 line.
    pub fn parse(line: &str, encoding: &Encoding) -> Hl7Result<Self> {
        let name: String = line.chars().take(3).collect();
        if name.len() != 3
            || !name
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(Hl7Error::InvalidSegment(format!(
                "invalid segment name: {line}"
            )));
        }

        let mut segment = Segment::new(name.clone());
        let mut parts = line.split(encoding.field).skip(1);
        let mut position = 1;
        if name == "MSH" {
            segment.set(1, encoding.field.to_string())?;
            segment.set(2, parts.next().unwrap_or_default())?;
            position = 3;
        }

        for raw_field in parts {
            for (rep_idx, raw_rep) in raw_field.split(encoding.repetition).enumerate() {
                for (comp_idx, raw_comp) in raw_rep.split(encoding.component).enumerate() {
                    if !raw_comp.is_empty() {
                        segment.set_repetition_component(
                            position,
                            rep_idx,
                            comp_idx + 1,
                            encoding.unescape(raw_comp),
                        )?;
                    }
                }
            }
            position += 1;
        }
        Ok(segment)
    }

    fn field_mut(&mut self, field: usize) -> Hl7Result<&mut Field> {
        if field == 0 || field > MAX_FIELDS {
            return Err(Hl7Error::FieldOutOfRange(field));
        }
        if self.fields.len() < field {
            self.fields.resize_with(field, Vec::new);
        }
        Ok(&mut self.fields[field - 1])
    }

    fn slot_mut(
        &mut self,
        field: usize,
        repetition: usize,
        component: usize,
    ) -> Hl7Result<&mut String> {
        if component == 0 || component > MAX_COMPONENTS {
            return Err(Hl7Error::FieldOutOfRange(component));
        }
        let reps = self.field_mut(field)?;
        if reps.len() <= repetition {
            reps.resize_with(repetition + 1, Vec::new);
        }
        let comps = &mut reps[repetition];
        if comps.len() < component {
            comps.resize_with(component, String::new);
        }
        Ok(&mut comps[component - 1])
    }
}

fn encode_field(field: &Field, encoding: &Encoding) -> String {
    let mut reps: Vec<String> = field
        .iter()
        .map(|rep| {
            let mut comps: Vec<String> = rep.iter().map(|c| encoding.escape(c)).collect();
            while comps.last().is_some_and(String::is_empty) {
                comps.pop();
            }
            comps.join(&encoding.component.to_string())
        })
        .collect();
    while reps.last().is_some_and(String::is_empty) {
        reps.pop();
    }
    reps.join(&encoding.repetition.to_string())
}
