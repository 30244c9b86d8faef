//! `.apkg` writer: an Anki schema 11 collection plus numbered media in a zip.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value, json};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{Connection, Executor};
use tracing::{debug, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::{DeckError, FlashcardDeck};

const COLLECTION_ENTRY: &str = "collection.anki2";
const MEDIA_INDEX_ENTRY: &str = "media";

/// Alphabet of note GUIDs.
const GUID_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!#$%&()*+,-./:;<=>?@[]^_`{|}~";

const COLLECTION_SCHEMA: &str = r"
CREATE TABLE col (
    id integer primary key, crt integer not null, mod integer not null,
    scm integer not null, ver integer not null, dty integer not null,
    usn integer not null, ls integer not null, conf text not null,
    models text not null, decks text not null, dconf text not null,
    tags text not null
);
CREATE TABLE notes (
    id integer primary key, guid text not null, mid integer not null,
    mod integer not null, usn integer not null, tags text not null,
    flds text not null, sfld integer not null, csum integer not null,
    flags integer not null, data text not null
);
CREATE TABLE cards (
    id integer primary key, nid integer not null, did integer not null,
    ord integer not null, mod integer not null, usn integer not null,
    type integer not null, queue integer not null, due integer not null,
    ivl integer not null, factor integer not null, reps integer not null,
    lapses integer not null, left integer not null, odue integer not null,
    odid integer not null, flags integer not null, data text not null
);
CREATE TABLE revlog (
    id integer primary key, cid integer not null, usn integer not null,
    ease integer not null, ivl integer not null, lastIvl integer not null,
    factor integer not null, time integer not null, type integer not null
);
CREATE TABLE graves (
    usn integer not null, oid integer not null, type integer not null
);
CREATE INDEX ix_notes_usn on notes (usn);
CREATE INDEX ix_cards_usn on cards (usn);
CREATE INDEX ix_revlog_usn on revlog (usn);
CREATE INDEX ix_cards_nid on cards (nid);
CREATE INDEX ix_cards_sched on cards (did, queue, due);
CREATE INDEX ix_revlog_cid on revlog (cid);
CREATE INDEX ix_notes_csum on notes (csum);
";

/// Writes `deck` to `output` via `<output>.part`.
pub(super) async fn write_package(
    deck: &FlashcardDeck,
    media_dir: &Path,
    output: &Path,
) -> Result<(), DeckError> {
    let collection_path = sibling(output, "anki2.tmp");
    remove_if_present(&collection_path).await?;
    let written = write_collection(deck, &collection_path).await;
    let collection = match written {
        Ok(()) => tokio::fs::read(&collection_path)
            .await
            .map_err(|source| DeckError::io(&collection_path, source)),
        Err(error) => Err(error),
    };
    remove_if_present(&collection_path).await?;
    let collection = collection?;

    let mut media = Vec::with_capacity(deck.media_files().len());
    for name in deck.media_files() {
        let path = media_dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => media.push((name.clone(), bytes)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                warn!(file = %path.display(), "media file missing; left out of the deck");
            }
            Err(source) => return Err(DeckError::io(path, source)),
        }
    }

    let part = sibling(output, "apkg.part");
    let archive_path = part.clone();
    tokio::task::spawn_blocking(move || write_archive(&archive_path, &collection, &media))
        .await??;
    tokio::fs::rename(&part, output)
        .await
        .map_err(|source| DeckError::io(output, source))?;
    debug!(path = %output.display(), "package written");
    Ok(())
}

fn sibling(output: &Path, extension: &str) -> PathBuf {
    output.with_extension(extension)
}

async fn remove_if_present(path: &Path) -> Result<(), DeckError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DeckError::io(path, source)),
    }
}

fn write_archive(
    path: &Path,
    collection: &[u8],
    media: &[(String, Vec<u8>)],
) -> Result<(), DeckError> {
    let file = File::create(path).map_err(|source| DeckError::io(path, source))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file(COLLECTION_ENTRY, options)?;
    zip.write_all(collection)
        .map_err(|source| DeckError::io(path, source))?;

    let index: Map<String, Value> = media
        .iter()
        .enumerate()
        .map(|(number, (name, _))| (number.to_string(), Value::String(name.clone())))
        .collect();
    zip.start_file(MEDIA_INDEX_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec(&index)?)
        .map_err(|source| DeckError::io(path, source))?;

    for (number, (_, bytes)) in media.iter().enumerate() {
        zip.start_file(number.to_string(), options)?;
        zip.write_all(bytes)
            .map_err(|source| DeckError::io(path, source))?;
    }

    let mut writer = zip.finish()?;
    writer
        .flush()
        .map_err(|source| DeckError::io(path, source))?;
    Ok(())
}

async fn write_collection(deck: &FlashcardDeck, path: &Path) -> Result<(), DeckError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let mut conn = SqliteConnection::connect_with(&options).await?;
    let filled = fill_collection(&mut conn, deck).await;
    conn.close().await?;
    filled
}

async fn fill_collection(conn: &mut SqliteConnection, deck: &FlashcardDeck) -> Result<(), DeckError> {
    let now_ms = unix_millis();
    let now_secs = now_ms / 1000;
    let model = deck.model();

    (&mut *conn).execute(sqlx::raw_sql(COLLECTION_SCHEMA)).await?;

    let mut tx = conn.begin().await?;

    let mut models = Map::new();
    models.insert(
        model.id.to_string(),
        model.to_collection_json(deck.id(), now_secs),
    );
    sqlx::query("INSERT INTO col VALUES (NULL, ?, ?, ?, 11, 0, 0, 0, ?, ?, ?, ?, '{}')")
        .bind(now_secs)
        .bind(now_ms)
        .bind(now_ms)
        .bind(serde_json::to_string(&collection_conf(model.id))?)
        .bind(serde_json::to_string(&models)?)
        .bind(serde_json::to_string(&decks_json(deck, now_secs))?)
        .bind(serde_json::to_string(&deck_conf())?)
        .execute(&mut *tx)
        .await?;

    let mut card_id = now_ms;
    for (position, fields) in deck.notes().iter().enumerate() {
        let position = i64::try_from(position).unwrap_or(i64::MAX);
        let note_id = now_ms.saturating_add(position);
        let sort_field = fields.first().map_or("", String::as_str);

        sqlx::query("INSERT INTO notes VALUES (?, ?, ?, ?, -1, '', ?, ?, ?, 0, '')")
            .bind(note_id)
            .bind(note_guid(fields))
            .bind(model.id)
            .bind(now_secs)
            .bind(fields.join("\x1f"))
            .bind(sort_field)
            .bind(field_checksum(sort_field))
            .execute(&mut *tx)
            .await?;

        for ordinal in model.card_ordinals(fields) {
            sqlx::query(
                "INSERT INTO cards VALUES (?, ?, ?, ?, ?, -1, 0, 0, ?, 0, 0, 0, 0, 0, 0, 0, 0, '')",
            )
            .bind(card_id)
            .bind(note_id)
            .bind(deck.id())
            .bind(i64::try_from(ordinal).unwrap_or(0))
            .bind(now_secs)
            .bind(position)
            .execute(&mut *tx)
            .await?;
            card_id = card_id.saturating_add(1);
        }
    }

    tx.commit().await?;
    Ok(())
}

fn unix_millis() -> i64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

/// Stable GUID for a note: its fields hashed and written in base 91.
fn note_guid(fields: &[String]) -> String {
    let digest = Sha256::digest(fields.join("\x1f").as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let mut value = u64::from_be_bytes(prefix);

    let base = GUID_ALPHABET.len() as u64;
    let mut encoded = Vec::new();
    loop {
        let digit = usize::try_from(value % base).unwrap_or(0);
        encoded.push(char::from(GUID_ALPHABET[digit]));
        value /= base;
        if value == 0 {
            break;
        }
    }
    encoded.iter().rev().collect()
}

/// First eight hex digits of the SHA-1 of the sort field, as an integer.
fn field_checksum(sort_field: &str) -> i64 {
    let digest = Sha1::digest(sort_field.as_bytes());
    i64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

fn collection_conf(model_id: i64) -> Value {
    json!({
        "activeDecks": [1],
        "curDeck": 1,
        "newSpread": 0,
        "collapseTime": 1200,
        "timeLim": 0,
        "estTimes": true,
        "dueCounts": true,
        "curModel": model_id.to_string(),
        "nextPos": 1,
        "sortType": "noteFld",
        "sortBackwards": false,
        "addToCur": true,
    })
}

fn deck_entry(id: i64, name: &str, modified_secs: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "desc": "",
        "mod": modified_secs,
        "usn": -1,
        "collapsed": false,
        "conf": 1,
        "dyn": 0,
        "extendNew": 10,
        "extendRev": 50,
        "newToday": [0, 0],
        "revToday": [0, 0],
        "lrnToday": [0, 0],
        "timeToday": [0, 0],
    })
}

fn decks_json(deck: &FlashcardDeck, modified_secs: i64) -> Value {
    let mut decks = Map::new();
    decks.insert("1".to_string(), deck_entry(1, "Default", 0));
    decks.insert(
        deck.id().to_string(),
        deck_entry(deck.id(), deck.title(), modified_secs),
    );
    Value::Object(decks)
}

fn deck_conf() -> Value {
    json!({
        "1": {
            "id": 1,
            "name": "Default",
            "mod": 0,
            "usn": 0,
            "dyn": false,
            "maxTaken": 60,
            "timer": 0,
            "autoplay": true,
            "replayq": true,
            "new": {
                "delays": [1, 10],
                "ints": [1, 4, 7],
                "initialFactor": 2500,
                "perDay": 20,
                "order": 1,
                "bury": true,
                "separate": true,
            },
            "rev": {
                "perDay": 100,
                "ease4": 1.3,
                "fuzz": 0.05,
                "ivlFct": 1,
                "maxIvl": 36500,
                "minSpace": 1,
                "bury": true,
            },
            "lapse": {
                "delays": [10],
                "mult": 0,
                "minInt": 1,
                "leechFails": 8,
                "leechAction": 0,
            },
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Read;

    use sqlx::Row;

    use super::*;
    use crate::deck::{CardTemplate, NoteModel};

    fn deck() -> FlashcardDeck {
        let model = NoteModel {
            id: 12,
            name: "m".to_string(),
            fields: vec!["Front".into(), "Back".into()],
            templates: vec![
                CardTemplate::new("1", "{{Front}}", "{{Back}}"),
                CardTemplate::new("2", "{{Back}}", "{{Front}}"),
            ],
            css: String::new(),
        };
        let mut deck = FlashcardDeck::new("Test Deck", model);
        deck.add_note(vec!["hai".to_string(), "yes".to_string()]);
        deck.add_note(vec![String::new(), "no front".to_string()]);
        deck
    }

    #[test]
    fn test_note_guid_is_stable_and_field_dependent() {
        let a = vec!["x".to_string(), "y".to_string()];
        let b = vec!["x".to_string(), "z".to_string()];
        assert_eq!(note_guid(&a), note_guid(&a));
        assert_ne!(note_guid(&a), note_guid(&b));
        assert!(note_guid(&a).chars().all(|c| GUID_ALPHABET.contains(&(c as u8))));
    }

    #[test]
    fn test_field_checksum_uses_sha1_prefix() {
        // sha1("") = da39a3ee...
        assert_eq!(field_checksum(""), 0xda39_a3ee);
    }

    #[tokio::test]
    async fn test_collection_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.anki2");
        write_collection(&deck(), &path).await.unwrap();

        let options = SqliteConnectOptions::new().filename(&path);
        let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
        let notes: i64 = sqlx::query("SELECT COUNT(*) FROM notes")
            .fetch_one(&mut conn)
            .await
            .unwrap()
            .get(0);
        let cards: i64 = sqlx::query("SELECT COUNT(*) FROM cards")
            .fetch_one(&mut conn)
            .await
            .unwrap()
            .get(0);
        let flds: String = sqlx::query("SELECT flds FROM notes ORDER BY id LIMIT 1")
            .fetch_one(&mut conn)
            .await
            .unwrap()
            .get(0);
        conn.close().await.unwrap();

        assert_eq!(notes, 2);
        assert_eq!(cards, 3, "the second note has no front card");
        assert_eq!(flds, "hai\x1fyes");
    }

    #[tokio::test]
    async fn test_package_contains_collection_and_media() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hai.mp3"), b"ID3").unwrap();
        let mut deck = deck();
        deck.add_media("hai.mp3");
        deck.add_media("missing.mp3");
        let output = dir.path().join("TestDeck.apkg");
        std::fs::write(&output, b"stale").unwrap();

        write_package(&deck, dir.path(), &output).await.unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&output).unwrap()).unwrap();
        assert!(archive.by_name(COLLECTION_ENTRY).is_ok());
        let mut index = String::new();
        archive
            .by_name(MEDIA_INDEX_ENTRY)
            .unwrap()
            .read_to_string(&mut index)
            .unwrap();
        assert_eq!(index, r#"{"0":"hai.mp3"}"#);
        let mut blob = Vec::new();
        archive.by_name("0").unwrap().read_to_end(&mut blob).unwrap();
        assert_eq!(blob, b"ID3");

        assert!(!output.with_extension("apkg.part").exists());
        assert!(!output.with_extension("anki2.tmp").exists());
    }
}
