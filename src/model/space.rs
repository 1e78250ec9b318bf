//! Space records mirrored from the collaboration service.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};

use super::duration::{format_iso8601, parse_iso8601};

/// Kind of a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpaceType {
  /// Personal space of a single user
  Private,
  /// Space shared by a team
  Team,
  /// Organizational space
  Orga,
}

impl SpaceType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Private => "PRIVATE",
      Self::Team => "TEAM",
      Self::Orga => "ORGA",
    }
  }
}

impl fmt::Display for SpaceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SpaceType {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_uppercase().as_str() {
      "PRIVATE" => Ok(Self::Private),
      "TEAM" => Ok(Self::Team),
      "ORGA" => Ok(Self::Orga),
      other => Err(eyre!("Unknown space type '{}'", other)),
    }
  }
}

/// Server-side retention policy of a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persistence {
  /// Items are never retained
  Off,
  /// Items are retained indefinitely
  On,
  /// Items are retained for the given time window
  Duration(Duration),
}

impl Persistence {
  /// Encode for the `persistence` column.
  pub fn to_column(&self) -> String {
    match self {
      Self::Off => "false".to_string(),
      Self::On => "true".to_string(),
      Self::Duration(d) => format_iso8601(*d),
    }
  }

  /// Decode a `persistence` column value.
  pub fn from_column(value: &str) -> Result<Self> {
    if value.eq_ignore_ascii_case("true") {
      return Ok(Self::On);
    }
    if value.eq_ignore_ascii_case("false") {
      return Ok(Self::Off);
    }
    parse_iso8601(value).map(Self::Duration)
  }
}

/// Role of a member within a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
  Owner,
  Moderator,
  Member,
}

impl Role {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Owner => "OWNER",
      Self::Moderator => "MODERATOR",
      Self::Member => "MEMBER",
    }
  }
}

impl FromStr for Role {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_uppercase().as_str() {
      "OWNER" => Ok(Self::Owner),
      "MODERATOR" => Ok(Self::Moderator),
      "MEMBER" => Ok(Self::Member),
      other => Err(eyre!("Unknown member role '{}'", other)),
    }
  }
}

/// A member of a space, identified by bare address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceMember {
  pub address: String,
  pub role: Role,
}

impl SpaceMember {
  pub fn new(address: impl Into<String>, role: Role) -> Self {
    Self {
      address: address.into(),
      role,
    }
  }
}

/// Typed configuration bundle attached to a space.
///
/// Within one space a channel is identified by its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceChannel {
  pub channel_type: String,
  pub properties: BTreeMap<String, String>,
}

impl SpaceChannel {
  pub fn new(channel_type: impl Into<String>) -> Self {
    Self {
      channel_type: channel_type.into(),
      properties: BTreeMap::new(),
    }
  }

  pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.properties.insert(key.into(), value.into());
    self
  }
}

/// A space as cached locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
  pub id: String,
  pub name: String,
  pub domain: String,
  pub space_type: SpaceType,
  pub persistence: Persistence,
  pub members: BTreeSet<SpaceMember>,
  pub channels: BTreeSet<SpaceChannel>,
}

impl Space {
  pub fn new(
    id: impl Into<String>,
    name: impl Into<String>,
    domain: impl Into<String>,
    space_type: SpaceType,
    persistence: Persistence,
  ) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      domain: domain.into(),
      space_type,
      persistence,
      members: BTreeSet::new(),
      channels: BTreeSet::new(),
    }
  }

  pub fn with_member(mut self, member: SpaceMember) -> Self {
    self.members.insert(member);
    self
  }

  pub fn with_channel(mut self, channel: SpaceChannel) -> Self {
    self.channels.insert(channel);
    self
  }

  /// Reject spaces that cannot be cached: id, name and domain are required.
  pub fn validate(&self) -> Result<()> {
    for (field, value) in [("id", &self.id), ("name", &self.name), ("domain", &self.domain)] {
      if value.trim().is_empty() {
        return Err(eyre!("Space '{}' has an empty {}", self.id, field));
      }
    }
    Ok(())
  }

  /// Copy of this space as both backends store it.
  ///
  /// Channels of the same type are merged into one and channels without
  /// properties are dropped. A member listed with several roles keeps the
  /// strongest one.
  pub fn normalized(&self) -> Self {
    let mut channels: BTreeMap<&str, SpaceChannel> = BTreeMap::new();
    for channel in &self.channels {
      channels
        .entry(&channel.channel_type)
        .or_insert_with(|| SpaceChannel::new(channel.channel_type.clone()))
        .properties
        .extend(channel.properties.clone());
    }

    // Members sort by address, then by role from Owner down.
    let mut members: BTreeMap<&str, &SpaceMember> = BTreeMap::new();
    for member in &self.members {
      members.entry(&member.address).or_insert(member);
    }

    Self {
      members: members.into_values().cloned().collect(),
      channels: channels
        .into_values()
        .filter(|c| !c.properties.is_empty())
        .collect(),
      ..self.clone()
    }
  }
}
