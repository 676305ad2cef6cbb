//! End-to-end session behavior over the in-memory store.

use serde::Serialize;
use unitwork_core::{
    DynEntity, Entity, EntityState, Error, FieldInfo, Filter, RelationInfo, Result, Row,
    SelectedRow, Value, ValueKind, erase,
};
use unitwork_memstore::MemoryStore;
use unitwork_session::{Database, Query, read, write};

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

#[derive(Debug, Clone, Serialize, Default)]
struct Player {
    id: Option<i64>,
    name: String,
    age: Option<i32>,
    version: Option<u64>,
    teams: Vec<Team>,
}

#[derive(Debug, Clone, Serialize, Default)]
struct Team {
    id: Option<i64>,
    name: String,
    coach: Option<String>,
    version: Option<u64>,
    players: Vec<Player>,
}

impl Player {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Team {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
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

fn database() -> Database<MemoryStore> {
    Database::new(MemoryStore::new())
}

// Seed one player, returning its key.
fn seed_player(db: &Database<MemoryStore>, name: &str) -> i64 {
    let mut session = db.session();
    let handle = session.add(Player::named(name)).unwrap();
    session.commit().unwrap();
    let key = read(&handle).id.unwrap();
    key
}

#[test]
fn add_commit_assigns_key_and_token() {
    let db = database();
    let mut session = db.session();

    let handle = session.add(Player::named("Arrington")).unwrap();
    assert_eq!(session.state_of(&handle), EntityState::Added);
    assert!(session.has_changes());

    session.commit().unwrap();

    let player = read(&handle);
    assert_eq!(player.id, Some(1));
    assert_eq!(player.version, Some(1));
    drop(player);
    assert_eq!(session.state_of(&handle), EntityState::Unchanged);
    assert!(!session.has_changes());
    db.with_store(|s| assert_eq!(s.row_count("players"), 1));
}

#[test]
fn find_consults_the_identity_map() {
    let db = database();
    let key = seed_player(&db, "Zidane");

    let mut session = db.session();
    let first = session.find::<Player>(key).unwrap().unwrap();
    let second = session.find::<Player>(key).unwrap().unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(read(&first).name, "Zidane");
}

#[test]
fn find_missing_key_is_none_not_an_error() {
    let db = database();
    let mut session = db.session();
    assert!(session.find::<Player>(42).unwrap().is_none());
}

#[test]
fn query_orders_rows() {
    let db = database();
    for name in ["Messi", "Arrington", "Zidane"] {
        seed_player(&db, name);
    }

    let mut session = db.session();
    let players: Vec<_> = session
        .query::<Player>(Query::new().order_by("name"))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    let names: Vec<String> = players.iter().map(|p| read(p).name.clone()).collect();
    assert_eq!(names, vec!["Arrington", "Messi", "Zidane"]);
}

#[test]
fn query_filter_narrows_rows() {
    let db = database();
    for name in ["Messi", "Arrington"] {
        seed_player(&db, name);
    }

    let mut session = db.session();
    let players: Vec<_> = session
        .query::<Player>(Query::new().filter(Filter::eq("name", "Messi")))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(players.len(), 1);
    assert_eq!(read(&players[0]).name, "Messi");
}

#[test]
fn tracked_mutation_is_detected_and_flushed() {
    let db = database();
    let key = seed_player(&db, "Messi");

    let mut session = db.session();
    let handle = session.find::<Player>(key).unwrap().unwrap();
    write(&handle).age = Some(36);
    assert!(session.has_changes());
    session.commit().unwrap();

    let mut verify = db.session();
    let reloaded = verify.find::<Player>(key).unwrap().unwrap();
    assert_eq!(read(&reloaded).age, Some(36));
    // Token advanced exactly once.
    assert_eq!(read(&reloaded).version, Some(2));
}

#[test]
fn disconnected_update_via_attach_modified() {
    let db = database();
    let key = seed_player(&db, "Old Name");

    // A detached instance carrying the key and captured token, the way a
    // web tier would round-trip it.
    let detached = Player {
        id: Some(key),
        name: "New Name".to_string(),
        age: Some(30),
        version: Some(1),
        teams: Vec::new(),
    };
    let mut session = db.session();
    let handle = session.attach(detached, EntityState::Modified).unwrap();
    assert_eq!(session.state_of(&handle), EntityState::Modified);
    session.commit().unwrap();

    let mut verify = db.session();
    let reloaded = verify.find::<Player>(key).unwrap().unwrap();
    assert_eq!(read(&reloaded).name, "New Name");
}

#[test]
fn disconnected_delete_via_attach_deleted() {
    let db = database();
    let key = seed_player(&db, "Goner");

    let detached = Player {
        id: Some(key),
        version: Some(1),
        ..Player::named("Goner")
    };
    let mut session = db.session();
    let handle = session.attach(detached, EntityState::Deleted).unwrap();
    session.commit().unwrap();

    assert_eq!(session.state_of(&handle), EntityState::Detached);
    let mut verify = db.session();
    assert!(verify.find::<Player>(key).unwrap().is_none());
    db.with_store(|s| assert_eq!(s.row_count("players"), 0));
}

#[test]
fn keyless_attach_requires_added() {
    let db = database();
    let mut session = db.session();
    let err = session
        .attach(Player::named("nobody"), EntityState::Modified)
        .unwrap_err();
    assert!(matches!(err, Error::Custom(_)));
}

#[test]
fn remove_added_entity_just_evicts_it() {
    let db = database();
    let mut session = db.session();
    let handle = session.add(Player::named("Fleeting")).unwrap();
    session.remove(&handle).unwrap();
    assert_eq!(session.state_of(&handle), EntityState::Detached);

    session.commit().unwrap();
    db.with_store(|s| assert_eq!(s.row_count("players"), 0));
}

#[test]
fn remove_then_commit_deletes_row_and_links() {
    let db = database();
    let (player_key, team_key) = {
        let mut session = db.session();
        let mut player = Player::named("Linked");
        player.teams.push(Team::named("Reds"));
        let handle = session.add(player).unwrap();
        session.commit().unwrap();
        let guard = read(&handle);
        (guard.id.unwrap(), guard.teams[0].id.unwrap())
    };
    db.with_store(|s| assert_eq!(s.link_count("player_teams"), 1));

    let mut session = db.session();
    let handle = session.find::<Player>(player_key).unwrap().unwrap();
    session.remove(&handle).unwrap();
    assert_eq!(session.state_of(&handle), EntityState::Deleted);
    session.commit().unwrap();

    db.with_store(|s| {
        assert_eq!(s.row_count("players"), 0);
        assert_eq!(s.row_count("teams"), 1);
        assert_eq!(s.link_count("player_teams"), 0);
    });
    let mut verify = db.session();
    assert!(verify.find::<Team>(team_key).unwrap().is_some());
}

#[test]
fn graph_add_inserts_and_links_new_members() {
    let db = database();

    // One team already persisted.
    let existing_key = {
        let mut session = db.session();
        let handle = session.add(Team::named("Veterans")).unwrap();
        session.commit().unwrap();
        let key = read(&handle).id.unwrap();
        key
    };

    let mut session = db.session();
    let mut player = Player::named("Rookie");
    player.teams.push(Team::named("Freshmen"));
    player.teams.push(Team {
        id: Some(existing_key),
        ..Team::named("Veterans")
    });
    let handle = session.add(player).unwrap();
    session.commit().unwrap();

    let guard = read(&handle);
    let player_key = guard.id.unwrap();
    let new_team_key = guard.teams[0].id.unwrap();
    assert_ne!(new_team_key, existing_key);
    drop(guard);

    db.with_store(|s| {
        assert_eq!(s.row_count("teams"), 2);
        assert_eq!(s.link_count("player_teams"), 2);
    });

    // Membership reads the same from the team side.
    let mut verify = db.session();
    let team = verify.find::<Team>(new_team_key).unwrap().unwrap();
    let members = verify.load_related::<Team, Player>(&team, "players").unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(read(&members[0]).id, Some(player_key));
}

#[test]
fn graph_add_reaches_nested_new_entities() {
    let db = database();
    let mut session = db.session();

    // A new player joining a new team that itself carries a new member.
    let mut walk_on = Player::named("Walk-on");
    walk_on.age = Some(18);
    let mut team = Team::named("Freshmen");
    team.players.push(walk_on);
    let mut rookie = Player::named("Rookie");
    rookie.teams.push(team);

    let handle = session.add(rookie).unwrap();
    session.commit().unwrap();

    let team_key = read(&handle).teams[0].id.unwrap();
    db.with_store(|s| {
        assert_eq!(s.row_count("players"), 2);
        assert_eq!(s.row_count("teams"), 1);
        assert_eq!(s.link_count("player_teams"), 2);
    });

    // Both players are on the roster in a fresh session.
    let mut verify = db.session();
    let team = verify.find::<Team>(team_key).unwrap().unwrap();
    let roster = verify.load_related::<Team, Player>(&team, "players").unwrap();
    let mut names: Vec<String> = roster.iter().map(|p| read(p).name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["Rookie", "Walk-on"]);
}

#[test]
fn validation_reaches_nested_graph_members() {
    let db = database();
    let mut session = db.session();

    let mut team = Team::named("Shadows");
    team.players.push(Player::named(""));
    let mut root = Player::named("Captain");
    root.teams.push(team);
    session.add(root).unwrap();

    let err = session.commit().unwrap_err();
    let Error::Validation(validation) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(validation.violations.len(), 1);
    assert!(validation
        .violations
        .iter()
        .any(|v| v.table == "players" && v.field == "name"));
    db.with_store(|s| {
        assert_eq!(s.row_count("players"), 0);
        assert_eq!(s.row_count("teams"), 0);
    });
}

#[test]
fn linking_an_existing_team_to_a_tracked_player() {
    let db = database();
    let player_key = seed_player(&db, "Joiner");
    let team_key = {
        let mut session = db.session();
        let handle = session.add(Team::named("Blues")).unwrap();
        session.commit().unwrap();
        let key = read(&handle).id.unwrap();
        key
    };

    let mut session = db.session();
    let player = session.find::<Player>(player_key).unwrap().unwrap();
    write(&player).teams.push(Team {
        id: Some(team_key),
        ..Team::named("Blues")
    });
    session.commit().unwrap();

    db.with_store(|s| assert_eq!(s.link_count("player_teams"), 1));
    // Collection-only changes do not advance the row token.
    let mut verify = db.session();
    let reloaded = verify.find::<Player>(player_key).unwrap().unwrap();
    assert_eq!(read(&reloaded).version, Some(1));
}

#[test]
fn include_eager_loads_the_relation() {
    let db = database();
    {
        let mut session = db.session();
        let mut player = Player::named("Star");
        player.teams.push(Team::named("Galaxy"));
        session.add(player).unwrap();
        session.commit().unwrap();
    }

    let mut session = db.session();
    let players: Vec<_> = session
        .query::<Player>(Query::new().include("teams"))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(players.len(), 1);
    let guard = read(&players[0]);
    assert_eq!(guard.teams.len(), 1);
    assert_eq!(guard.teams[0].name, "Galaxy");
}

#[test]
fn validation_reports_every_violation_before_the_store() {
    let db = database();
    let mut session = db.session();

    let mut player = Player::named("");
    player.age = Some(-3);
    player.teams.push(Team::named(""));
    session.add(player).unwrap();

    let err = session.commit().unwrap_err();
    let Error::Validation(validation) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(validation.violations.len(), 3);
    assert!(validation
        .violations
        .iter()
        .any(|v| v.table == "players" && v.field == "name"));
    assert!(validation
        .violations
        .iter()
        .any(|v| v.table == "players" && v.field == "age"));
    assert!(validation
        .violations
        .iter()
        .any(|v| v.table == "teams" && v.field == "name"));
    db.with_store(|s| {
        assert_eq!(s.row_count("players"), 0);
        assert_eq!(s.row_count("teams"), 0);
    });
}

#[test]
fn concurrency_conflict_rolls_back_and_preserves_states() {
    let db = database();
    let key = seed_player(&db, "Contested");

    let mut first = db.session();
    let mut second = db.session();
    let from_first = first.find::<Player>(key).unwrap().unwrap();
    let from_second = second.find::<Player>(key).unwrap().unwrap();

    write(&from_first).name = "First wins".to_string();
    first.commit().unwrap();

    write(&from_second).age = Some(50);
    let err = second.commit().unwrap_err();
    assert!(err.is_conflict());

    // Loser's tracked state and in-memory values survive the rollback.
    assert_eq!(second.state_of(&from_second), EntityState::Modified);
    assert_eq!(read(&from_second).age, Some(50));

    // The store kept the winner's write and nothing of the loser's.
    let mut verify = db.session();
    let reloaded = verify.find::<Player>(key).unwrap().unwrap();
    assert_eq!(read(&reloaded).name, "First wins");
    assert_eq!(read(&reloaded).age, None);

    // Reloading fresh and retrying succeeds.
    let mut retry = db.session();
    let fresh = retry.find::<Player>(key).unwrap().unwrap();
    write(&fresh).age = Some(50);
    retry.commit().unwrap();
}

#[test]
fn conflict_rolls_back_sibling_writes_in_the_same_commit() {
    let db = database();
    let fresh_key = seed_player(&db, "Fresh");
    let stale_key = seed_player(&db, "Stale");

    let mut session = db.session();
    let fresh = session.find::<Player>(fresh_key).unwrap().unwrap();
    let stale = session.find::<Player>(stale_key).unwrap().unwrap();
    write(&fresh).name = "Fresh v2".to_string();
    write(&stale).name = "Stale v2".to_string();

    // Another writer bumps the second row's token first.
    {
        let mut racer = db.session();
        let other = racer.find::<Player>(stale_key).unwrap().unwrap();
        write(&other).name = "Racer".to_string();
        racer.commit().unwrap();
    }

    assert!(session.commit().unwrap_err().is_conflict());

    // Neither update landed; the commit is all-or-nothing.
    let mut verify = db.session();
    let first = verify.find::<Player>(fresh_key).unwrap().unwrap();
    assert_eq!(read(&first).name, "Fresh");
}

#[test]
fn instance_cannot_be_attached_to_two_live_sessions() {
    let db = database();
    let key = seed_player(&db, "Shared");

    let mut first = db.session();
    let handle = first.find::<Player>(key).unwrap().unwrap();

    let mut second = db.session();
    let err = second
        .attach_handle(&handle, EntityState::Unchanged)
        .unwrap_err();
    assert!(matches!(err, Error::Attach(_)));

    // An independent load of the same row is fine.
    assert!(second.find::<Player>(key).unwrap().is_some());

    // Once the owning session is gone, the instance is free again.
    drop(first);
    let mut third = db.session();
    third
        .attach_handle(&handle, EntityState::Unchanged)
        .unwrap();
}

#[test]
fn local_lists_tracked_entities_with_states() {
    let db = database();
    let key = seed_player(&db, "Resident");

    let mut session = db.session();
    let found = session.find::<Player>(key).unwrap().unwrap();
    let added = session.add(Player::named("Newcomer")).unwrap();
    session.remove(&found).unwrap();

    let local = session.local::<Player>();
    assert_eq!(local.len(), 2);
    assert_eq!(local[0].0, EntityState::Deleted);
    assert_eq!(local[1].0, EntityState::Added);
    assert!(std::sync::Arc::ptr_eq(&local[1].1, &added));

    session.commit().unwrap();
    let local = session.local::<Player>();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].0, EntityState::Unchanged);
}

#[test]
fn commit_with_nothing_pending_is_a_no_op() {
    let db = database();
    let key = seed_player(&db, "Idle");

    let mut session = db.session();
    session.find::<Player>(key).unwrap().unwrap();
    session.commit().unwrap();
    session.commit().unwrap();

    let mut verify = db.session();
    let reloaded = verify.find::<Player>(key).unwrap().unwrap();
    assert_eq!(read(&reloaded).version, Some(1));
}

#[test]
fn load_related_sees_uncommitted_tracked_memberships() {
    let db = database();
    let team_key = {
        let mut session = db.session();
        let handle = session.add(Team::named("Pending")).unwrap();
        session.commit().unwrap();
        let key = read(&handle).id.unwrap();
        key
    };
    let player_key = seed_player(&db, "Joiner");

    let mut session = db.session();
    let player = session.find::<Player>(player_key).unwrap().unwrap();
    write(&player).teams.push(Team {
        id: Some(team_key),
        ..Team::named("Pending")
    });

    // Before commit, the membership is already visible from the team side.
    let team = session.find::<Team>(team_key).unwrap().unwrap();
    let members = session.load_related::<Team, Player>(&team, "players").unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(read(&members[0]).id, Some(player_key));
}
