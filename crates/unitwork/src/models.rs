//! The bundled Player/Team model pair.
//!
//! Two entity types joined by an ownership-free many-to-many relation over
//! the `player_teams` join table. Either side can load or extend the
//! membership; both read the same pairs.

use serde::Serialize;
use unitwork_core::{
    DynEntity, Entity, FieldInfo, RelationInfo, Result, Row, SelectedRow, Value, ValueKind, erase,
};

const PLAYER_TEAMS: RelationInfo = RelationInfo {
    name: "teams",
    link_table: "player_teams",
    local_column: "player_id",
    remote_column: "team_id",
    target_table: "teams",
};

const TEAM_PLAYERS: RelationInfo = RelationInfo {
    name: "players",
    link_table: "player_teams",
    local_column: "team_id",
    remote_column: "player_id",
    target_table: "players",
};

/// A player, possibly a member of several teams.
///
/// `id` and `version` are store-assigned; leave both `None` on a new
/// instance. A detached instance round-trips them so a later session can
/// attach it as Modified or Deleted.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Player {
    /// Store-assigned key
    pub id: Option<i64>,
    /// Display name, required, at most 60 characters
    pub name: String,
    /// Age in years, if known
    pub age: Option<i32>,
    /// Concurrency token captured at load time
    pub version: Option<u64>,
    /// Team memberships; keyless members are inserted on commit
    pub teams: Vec<Team>,
}

/// A team with an optional coach.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Team {
    /// Store-assigned key
    pub id: Option<i64>,
    /// Team name, required, at most 60 characters
    pub name: String,
    /// Coach name, if any
    pub coach: Option<String>,
    /// Concurrency token captured at load time
    pub version: Option<u64>,
    /// Member players; keyless members are inserted on commit
    pub players: Vec<Player>,
}

impl Player {
    /// A new, unpersisted player.
    #[must_use]
    pub fn new(name: &str, age: Option<i32>) -> Self {
        Self {
            name: name.to_string(),
            age,
            ..Self::default()
        }
    }
}

impl Team {
    /// A new, unpersisted team.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Set the coach.
    #[must_use]
    pub fn with_coach(mut self, coach: &str) -> Self {
        self.coach = Some(coach.to_string());
        self
    }
}

impl Entity for Player {
    const TABLE: &'static str = "players";
    const RELATIONS: &'static [RelationInfo] = &[PLAYER_TEAMS];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: [FieldInfo; 3] = [
            FieldInfo::new("id", ValueKind::BigInt).key(true),
            FieldInfo::new("name", ValueKind::Text)
                .required(true)
                .max_length(60),
            FieldInfo::new("age", ValueKind::Int).nullable(true).min(0),
        ];
        &FIELDS
    }

    fn key(&self) -> Option<i64> {
        self.id
    }

    fn set_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn token(&self) -> Option<u64> {
        self.version
    }

    fn set_token(&mut self, token: u64) {
        self.version = Some(token);
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", Value::Text(self.name.clone())),
            ("age", Value::from(self.age)),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.try_text("name")?,
            age: match row.get("age") {
                Some(Value::Int(n)) => Some(*n),
                _ => None,
            },
            ..Self::default()
        })
    }

    fn related_new(&self, relation: &str) -> Vec<DynEntity> {
        if relation != "teams" {
            return Vec::new();
        }
        self.teams
            .iter()
            .filter(|t| t.id.is_none())
            .map(|t| erase(t.clone()))
            .collect()
    }

    fn related_keys(&self, relation: &str) -> Vec<i64> {
        if relation != "teams" {
            return Vec::new();
        }
        self.teams.iter().filter_map(|t| t.id).collect()
    }

    fn adopt_related_keys(&mut self, relation: &str, keys: &[i64]) {
        if relation != "teams" {
            return;
        }
        let mut assigned = keys.iter().copied();
        for team in self.teams.iter_mut().filter(|t| t.id.is_none()) {
            team.id = assigned.next();
        }
    }

    fn set_related(&mut self, relation: &str, members: &[SelectedRow]) -> Result<()> {
        if relation != "teams" {
            return Ok(());
        }
        self.teams = members
            .iter()
            .map(|m| {
                let mut team = Team::from_row(&m.row)?;
                team.id = Some(m.key);
                team.version = Some(m.token);
                Ok(team)
            })
            .collect::<Result<_>>()?;
        Ok(())
    }
}

impl Entity for Team {
    const TABLE: &'static str = "teams";
    const RELATIONS: &'static [RelationInfo] = &[TEAM_PLAYERS];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: [FieldInfo; 3] = [
            FieldInfo::new("id", ValueKind::BigInt).key(true),
            FieldInfo::new("name", ValueKind::Text)
                .required(true)
                .max_length(60),
            FieldInfo::new("coach", ValueKind::Text).nullable(true),
        ];
        &FIELDS
    }

    fn key(&self) -> Option<i64> {
        self.id
    }

    fn set_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn token(&self) -> Option<u64> {
        self.version
    }

    fn set_token(&mut self, token: u64) {
        self.version = Some(token);
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", Value::Text(self.name.clone())),
            ("coach", Value::from(self.coach.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.try_text("name")?,
            coach: match row.get("coach") {
                Some(Value::Text(s)) => Some(s.clone()),
                _ => None,
            },
            ..Self::default()
        })
    }

    fn related_new(&self, relation: &str) -> Vec<DynEntity> {
        if relation != "players" {
            return Vec::new();
        }
        self.players
            .iter()
            .filter(|p| p.id.is_none())
            .map(|p| erase(p.clone()))
            .collect()
    }

    fn related_keys(&self, relation: &str) -> Vec<i64> {
        if relation != "players" {
            return Vec::new();
        }
        self.players.iter().filter_map(|p| p.id).collect()
    }

    fn adopt_related_keys(&mut self, relation: &str, keys: &[i64]) {
        if relation != "players" {
            return;
        }
        let mut assigned = keys.iter().copied();
        for player in self.players.iter_mut().filter(|p| p.id.is_none()) {
            player.id = assigned.next();
        }
    }

    fn set_related(&mut self, relation: &str, members: &[SelectedRow]) -> Result<()> {
        if relation != "players" {
            return Ok(());
        }
        self.players = members
            .iter()
            .map(|m| {
                let mut player = Player::from_row(&m.row)?;
                player.id = Some(m.key);
                player.version = Some(m.token);
                Ok(player)
            })
            .collect::<Result<_>>()?;
        Ok(())
    }
}
