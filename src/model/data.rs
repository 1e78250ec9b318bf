//! Outbound payloads and received data objects.

use std::collections::HashSet;

use color_eyre::{eyre::eyre, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Namespace + schema pair describing the shape of a data object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataModel {
  pub namespace: String,
  pub schema_location: String,
}

impl DataModel {
  pub fn new(namespace: impl Into<String>, schema_location: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
      schema_location: schema_location.into(),
    }
  }
}

/// A serialized publication waiting in the send queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
  pub element_name: String,
  pub namespace: String,
  pub body: String,
}

impl Payload {
  pub fn new(
    element_name: impl Into<String>,
    namespace: impl Into<String>,
    body: impl Into<String>,
  ) -> Self {
    Self {
      element_name: element_name.into(),
      namespace: namespace.into(),
      body: body.into(),
    }
  }
}

/// A received or retained data object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataObject {
  pub id: String,
  pub element_name: String,
  pub namespace: String,
  pub body: String,
  data_model: Option<DataModel>,
}

impl DataObject {
  /// Build a data object from its serialized XML body.
  ///
  /// Fails if the body is not well-formed. The data model is taken from the
  /// root element's `xsi:schemaLocation`; objects without one have no model.
  pub fn parse(
    id: impl Into<String>,
    element_name: impl Into<String>,
    namespace: impl Into<String>,
    body: impl Into<String>,
  ) -> Result<Self> {
    let id = id.into();
    let namespace = namespace.into();
    let body = body.into();
    let schema_location = scan_schema_location(&body)
      .map_err(|e| eyre!("Malformed body for data object '{}': {}", id, e))?;
    let data_model = schema_location
      .and_then(|locations| schema_for_namespace(&locations, &namespace))
      .map(|schema| DataModel::new(namespace.clone(), schema));

    Ok(Self {
      id,
      element_name: element_name.into(),
      namespace,
      body,
      data_model,
    })
  }

  pub fn data_model(&self) -> Option<&DataModel> {
    self.data_model.as_ref()
  }

  /// Whether this object's model is one of `supported`.
  pub fn is_supported_by(&self, supported: &HashSet<DataModel>) -> bool {
    self
      .data_model
      .as_ref()
      .is_some_and(|model| supported.contains(model))
  }
}

/// Read the whole document and return the root's `schemaLocation` attribute.
fn scan_schema_location(body: &str) -> Result<Option<String>> {
  let mut reader = Reader::from_str(body);
  reader.trim_text(true);

  let mut depth = 0usize;
  let mut root_seen = false;
  let mut location = None;

  loop {
    match reader.read_event()? {
      Event::Start(element) => {
        if !root_seen {
          location = schema_location_attr(&element)?;
          root_seen = true;
        } else if depth == 0 {
          return Err(eyre!("More than one root element"));
        }
        depth += 1;
      }
      Event::Empty(element) => {
        if !root_seen {
          location = schema_location_attr(&element)?;
          root_seen = true;
        } else if depth == 0 {
          return Err(eyre!("More than one root element"));
        }
      }
      Event::End(_) => {
        depth = depth
          .checked_sub(1)
          .ok_or_else(|| eyre!("Unbalanced closing tag"))?;
      }
      Event::Text(text) if depth == 0 && !text.is_empty() => {
        return Err(eyre!("Text outside of the root element"));
      }
      Event::Eof => break,
      _ => {}
    }
  }

  if !root_seen {
    return Err(eyre!("Document has no root element"));
  }
  if depth != 0 {
    return Err(eyre!("Root element is not closed"));
  }
  Ok(location)
}

fn schema_location_attr(element: &BytesStart<'_>) -> Result<Option<String>> {
  for attr in element.attributes() {
    let attr = attr?;
    if attr.key.local_name().as_ref() == b"schemaLocation" {
      return Ok(Some(attr.unescape_value()?.into_owned()));
    }
  }
  Ok(None)
}

/// `schemaLocation` holds namespace/location pairs; pick the one for
/// `namespace`, falling back to the last location listed.
fn schema_for_namespace(locations: &str, namespace: &str) -> Option<String> {
  let tokens: Vec<&str> = locations.split_whitespace().collect();
  tokens
    .iter()
    .position(|t| *t == namespace)
    .and_then(|i| tokens.get(i + 1))
    .or_else(|| tokens.last())
    .map(|s| s.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  pub const MOOD_NS: &str = "mirror:application:moodmap:mood";
  pub const MOOD_XSD: &str = "http://data.mirror-demo.eu/application/moodmap/mood-1.0.xsd";

  pub fn mood_body(id: &str, schema: &str) -> String {
    format!(
      r#"<mood xmlns="{ns}" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:schemaLocation="{ns} {schema}" id="{id}"><value>0.8</value></mood>"#,
      ns = MOOD_NS,
      schema = schema,
      id = id
    )
  }

  #[test]
  fn test_parse_extracts_data_model() {
    let obj = DataObject::parse("m1", "mood", MOOD_NS, mood_body("m1", MOOD_XSD)).unwrap();
    assert_eq!(obj.data_model(), Some(&DataModel::new(MOOD_NS, MOOD_XSD)));
  }

  #[test]
  fn test_parse_without_schema_location() {
    let obj = DataObject::parse("x", "note", "urn:note", "<note xmlns=\"urn:note\"/>").unwrap();
    assert!(obj.data_model().is_none());
    assert!(!obj.is_supported_by(&HashSet::from([DataModel::new("urn:note", "note.xsd")])));
  }

  #[test]
  fn test_parse_rejects_malformed_body() {
    assert!(DataObject::parse("x", "mood", MOOD_NS, "<mood><value></mood>").is_err());
    assert!(DataObject::parse("x", "mood", MOOD_NS, "<mood>").is_err());
    assert!(DataObject::parse("x", "mood", MOOD_NS, "not xml at all").is_err());
  }

  #[test]
  fn test_schema_location_falls_back_to_last_token() {
    assert_eq!(
      schema_for_namespace("urn:other a.xsd urn:more b.xsd", "urn:none"),
      Some("b.xsd".to_string())
    );
    assert_eq!(
      schema_for_namespace("urn:other a.xsd urn:mine b.xsd", "urn:other"),
      Some("a.xsd".to_string())
    );
  }

  #[test]
  fn test_is_supported_by() {
    let obj = DataObject::parse("m1", "mood", MOOD_NS, mood_body("m1", MOOD_XSD)).unwrap();
    let older = DataModel::new(MOOD_NS, "mood-0.9.xsd");
    assert!(obj.is_supported_by(&HashSet::from([DataModel::new(MOOD_NS, MOOD_XSD)])));
    assert!(!obj.is_supported_by(&HashSet::from([older])));
  }
}
