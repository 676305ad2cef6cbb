//! Walkthrough of the session lifecycle: inserts, queries, disconnected
//! edits, graph adds, eager loading and an optimistic-concurrency conflict.
//!
//! Run with `cargo run --example teams`.

use unitwork::models::{Player, Team};
use unitwork::{Database, EntityState, MemoryStore, Query, read, write};

fn main() -> unitwork::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let db = Database::new(MemoryStore::new());

    // Insert a few players and a coached team.
    let (zidane_key, lions_key) = {
        let mut session = db.session();
        session.add(Player::new("Messi", Some(36)))?;
        session.add(Player::new("Arrington", Some(28)))?;
        let zidane = session.add(Player::new("Zidane", Some(51)))?;
        let lions = session.add(Team::new("Lions").with_coach("Ancelotti"))?;
        session.commit()?;
        let keys = (read(&zidane).id.unwrap(), read(&lions).id.unwrap());
        keys
    };

    // Ordered query.
    {
        let mut session = db.session();
        println!("players by name:");
        for player in session.query::<Player>(Query::new().order_by("name"))? {
            let player = player?;
            let guard = read(&player);
            println!("  {} (age {:?})", guard.name, guard.age);
        }
    }

    // Disconnected update: a detached instance carrying key and token,
    // attached as Modified in a fresh session.
    {
        let detached = Player {
            id: Some(zidane_key),
            name: "Zinedine Zidane".to_string(),
            age: Some(51),
            version: Some(1),
            teams: Vec::new(),
        };
        let mut session = db.session();
        session.attach(detached, EntityState::Modified)?;
        session.commit()?;
        println!("renamed player {zidane_key} while detached");
    }

    // Graph add: a new player joining one brand-new team and one that is
    // already persisted. The new team is inserted and linked in the same
    // commit.
    let rookie_key = {
        let mut session = db.session();
        let mut rookie = Player::new("Rookie", Some(19));
        rookie.teams.push(Team::new("Freshmen"));
        rookie.teams.push(Team {
            id: Some(lions_key),
            ..Team::new("Lions")
        });
        let handle = session.add(rookie)?;
        session.commit()?;
        let guard = read(&handle);
        println!(
            "rookie {} joined teams {:?}",
            guard.id.unwrap(),
            guard.teams.iter().map(|t| t.id).collect::<Vec<_>>()
        );
        guard.id.unwrap()
    };

    // Eager load the relation while querying.
    {
        let mut session = db.session();
        for player in session.query::<Player>(Query::new().include("teams"))? {
            let player = player?;
            let guard = read(&player);
            if !guard.teams.is_empty() {
                let names: Vec<&str> = guard.teams.iter().map(|t| t.name.as_str()).collect();
                println!("{} plays for {}", guard.name, names.join(", "));
            }
        }
    }

    // Explicit collection load from the team side of the relation.
    {
        let mut session = db.session();
        let lions = session.find::<Team>(lions_key)?.unwrap();
        let roster = session.load_related::<Team, Player>(&lions, "players")?;
        let names: Vec<String> = roster.iter().map(|p| read(p).name.clone()).collect();
        println!("Lions roster: {}", names.join(", "));
    }

    // Two sessions race on the same row; the second commit loses and can
    // retry after reloading.
    {
        let mut first = db.session();
        let mut second = db.session();
        let from_first = first.find::<Player>(rookie_key)?.unwrap();
        let from_second = second.find::<Player>(rookie_key)?.unwrap();

        write(&from_first).age = Some(20);
        first.commit()?;

        write(&from_second).age = Some(21);
        match second.commit() {
            Err(err) if err.is_conflict() => println!("second writer lost: {err}"),
            other => other?,
        }

        let mut retry = db.session();
        let fresh = retry.find::<Player>(rookie_key)?.unwrap();
        write(&fresh).age = Some(21);
        retry.commit()?;
        println!("retry after reload succeeded");
    }

    // The local view reflects pending work before commit.
    let (bench_key, bench_token) = {
        let mut session = db.session();
        let doomed = session.find::<Player>(rookie_key)?.unwrap();
        session.remove(&doomed)?;
        let bench = session.add(Player::new("Benchwarmer", None))?;
        for (state, player) in session.local::<Player>() {
            println!("local: {} is {state}", read(&player).name);
        }
        session.commit()?;
        let guard = read(&bench);
        (guard.id.unwrap(), guard.version.unwrap())
    };

    // Validation reports every offending field at once, store untouched.
    {
        let mut session = db.session();
        let mut invalid = Player::new("", Some(-1));
        invalid.teams.push(Team::new(""));
        session.add(invalid)?;
        if let Err(err) = session.commit() {
            println!("rejected invalid batch:\n{err}");
        }
    }

    // Disconnected delete: key and token are all a later session needs.
    {
        let detached = Player {
            id: Some(bench_key),
            name: "Benchwarmer".to_string(),
            age: None,
            version: Some(bench_token),
            teams: Vec::new(),
        };
        let mut session = db.session();
        session.attach(detached, EntityState::Deleted)?;
        session.commit()?;

        let mut verify = db.session();
        assert!(verify.find::<Player>(bench_key)?.is_none());
        println!("deleted player {bench_key} while detached");
    }

    Ok(())
}
