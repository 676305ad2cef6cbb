//! Many-to-many relation metadata and normalized link pairs.
//!
//! Relations are ownership-free views over a shared join table. A pair is
//! stored once, normalized by column name, so membership reads identically
//! from either endpoint of the relation.

/// Metadata for one side of a many-to-many relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationInfo {
    /// Relation name on the entity ("teams", "players", ...)
    pub name: &'static str,
    /// The join table backing this relation
    pub link_table: &'static str,
    /// Join column holding this entity's key
    pub local_column: &'static str,
    /// Join column holding the related entity's key
    pub remote_column: &'static str,
    /// Table the relation points at
    pub target_table: &'static str,
}

/// Find a relation by name in an entity's relation metadata.
#[must_use]
pub fn find_relation(
    relations: &'static [RelationInfo],
    name: &str,
) -> Option<&'static RelationInfo> {
    relations.iter().find(|r| r.name == name)
}

/// A membership pair in a join table, normalized by column name.
///
/// Both sides of a relation produce the same `LinkPair` for the same
/// membership, which is what keeps the relation symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkPair {
    pub table: &'static str,
    pub a_column: &'static str,
    pub a_key: i64,
    pub b_column: &'static str,
    pub b_key: i64,
}

impl LinkPair {
    /// Build a normalized pair from one side of a relation.
    #[must_use]
    pub fn new(relation: &RelationInfo, local_key: i64, remote_key: i64) -> Self {
        if relation.local_column <= relation.remote_column {
            Self {
                table: relation.link_table,
                a_column: relation.local_column,
                a_key: local_key,
                b_column: relation.remote_column,
                b_key: remote_key,
            }
        } else {
            Self {
                table: relation.link_table,
                a_column: relation.remote_column,
                a_key: remote_key,
                b_column: relation.local_column,
                b_key: local_key,
            }
        }
    }

    /// The key on the far side of `column = key`, if this pair matches it.
    #[must_use]
    pub fn other_end(&self, table: &str, column: &str, key: i64) -> Option<i64> {
        if self.table != table {
            return None;
        }
        if self.a_column == column && self.a_key == key {
            Some(self.b_key)
        } else if self.b_column == column && self.b_key == key {
            Some(self.a_key)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEAMS: RelationInfo = RelationInfo {
        name: "teams",
        link_table: "player_teams",
        local_column: "player_id",
        remote_column: "team_id",
        target_table: "teams",
    };

    const PLAYERS: RelationInfo = RelationInfo {
        name: "players",
        link_table: "player_teams",
        local_column: "team_id",
        remote_column: "player_id",
        target_table: "players",
    };

    #[test]
    fn both_sides_normalize_to_same_pair() {
        let from_player = LinkPair::new(&TEAMS, 1, 9);
        let from_team = LinkPair::new(&PLAYERS, 9, 1);
        assert_eq!(from_player, from_team);
    }

    #[test]
    fn other_end_reads_from_either_side() {
        let pair = LinkPair::new(&TEAMS, 1, 9);
        assert_eq!(pair.other_end("player_teams", "player_id", 1), Some(9));
        assert_eq!(pair.other_end("player_teams", "team_id", 9), Some(1));
        assert_eq!(pair.other_end("player_teams", "player_id", 2), None);
        assert_eq!(pair.other_end("other", "player_id", 1), None);
    }

    #[test]
    fn find_relation_by_name() {
        static RELS: [RelationInfo; 1] = [TEAMS];
        assert!(find_relation(&RELS, "teams").is_some());
        assert!(find_relation(&RELS, "coaches").is_none());
    }
}
