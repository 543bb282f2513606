use rusqlite::Connection;
use scistash_core::{
    derive_id, open_db_in_memory, Annotation, Article, ArticleDraft, Author, Entity, EntityKind,
    IdentityIndex, OwnerRef, Reference, RepoError, SqliteStashRepository, StashRepository, Tag,
};

fn save(
    repo: &mut SqliteStashRepository<'_>,
    index: &mut IdentityIndex,
    entity: impl Into<Entity>,
) -> Entity {
    let mut entity = entity.into();
    repo.save(Some(&mut entity), index).unwrap();
    entity
}

fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

fn draft(refkey: &str, authors: Vec<Author>) -> ArticleDraft {
    ArticleDraft {
        refkey: refkey.to_string(),
        authors,
        title: "Sketch of the Analytical Engine".to_string(),
        year: 1843,
        journal: "Scientific Memoirs".to_string(),
        volume: 3,
        number: 1,
        pages: (666, 731),
        retracted: false,
    }
}

#[test]
fn renaming_an_author_moves_its_row() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteStashRepository::try_new(&mut conn).unwrap();
    let mut index = IdentityIndex::new();

    let mut author = save(&mut repo, &mut index, Author::new("Ada", "Lovelace"));
    let old_id = author.id();
    assert_eq!(old_id, derive_id(EntityKind::Author, b"AdaLovelace"));

    author.edit("lastname", "King").unwrap();
    let new_id = author.id();
    assert_eq!(new_id, derive_id(EntityKind::Author, b"AdaKing"));
    assert_eq!(author.prior(), Some(old_id));

    let report = repo.save(Some(&mut author), &mut index).unwrap();
    assert_eq!(report.replaced, Some(old_id));
    assert!(!repo.exists(old_id, EntityKind::Author).unwrap());
    assert!(repo.exists(new_id, EntityKind::Author).unwrap());
    assert!(!index.contains(old_id));
    assert_eq!(index.resolve(new_id).unwrap(), EntityKind::Author);
    assert_eq!(author.prior(), Some(new_id));
    assert!(!author.is_dirty());
}

#[test]
fn article_save_inserts_missing_authors_then_links() {
    let mut conn = open_db_in_memory().unwrap();
    let ada = Author::new("Ada", "Lovelace");
    let charles = Author::new("Charles", "Babbage");
    let article = Article::new(draft("menabrea1843", vec![ada.clone(), charles.clone()]));

    {
        let mut repo = SqliteStashRepository::try_new(&mut conn).unwrap();
        let mut index = IdentityIndex::new();
        let mut entity = Entity::from(article.clone());
        let report = repo.save(Some(&mut entity), &mut index).unwrap();

        assert_eq!(
            report.inserted,
            vec![
                (ada.id(), EntityKind::Author),
                (charles.id(), EntityKind::Author),
                (article.id(), EntityKind::Article),
            ]
        );

        let fetched = repo.fetch(article.id(), EntityKind::Article).unwrap();
        let Entity::Article(fetched) = fetched else {
            panic!("expected an article");
        };
        assert_eq!(fetched.author_ids(), vec![ada.id(), charles.id()]);
        assert!(!fetched.identity().is_dirty());
    }

    assert_eq!(count_rows(&conn, "authors"), 2);
    assert_eq!(count_rows(&conn, "articles"), 1);
    assert_eq!(count_rows(&conn, "article_authors"), 2);
}

#[test]
fn saving_unchanged_durable_entity_twice_is_a_noop() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let mut repo = SqliteStashRepository::try_new(&mut conn).unwrap();
        let mut index = IdentityIndex::new();
        let mut author = save(&mut repo, &mut index, Author::new("Ada", "Lovelace"));
        let id = author.id();

        for _ in 0..2 {
            match repo.save(Some(&mut author), &mut index) {
                Err(RepoError::NoOpSave(noop_id)) => assert_eq!(noop_id, id),
                other => panic!("expected NoOpSave, got {other:?}"),
            }
        }

        let mut duplicate = Entity::from(Author::new("Ada", "Lovelace"));
        assert!(matches!(
            repo.save(Some(&mut duplicate), &mut index),
            Err(RepoError::NoOpSave(_))
        ));
    }
    assert_eq!(count_rows(&conn, "authors"), 1);
}

#[test]
fn save_without_entity_is_rejected() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteStashRepository::try_new(&mut conn).unwrap();
    let mut index = IdentityIndex::new();
    assert!(matches!(
        repo.save(None, &mut index),
        Err(RepoError::NullEntity)
    ));
}

#[test]
fn fetch_missing_row_is_not_found() {
    let mut conn = open_db_in_memory().unwrap();
    let repo = SqliteStashRepository::try_new(&mut conn).unwrap();
    let id = Author::new("Nobody", "Here").id();
    assert!(matches!(
        repo.fetch(id, EntityKind::Author),
        Err(RepoError::NotFound(missing)) if missing == id
    ));
}

#[test]
fn rekeying_an_article_moves_everything_that_hangs_off_it() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteStashRepository::try_new(&mut conn).unwrap();
    let mut index = IdentityIndex::new();

    let mut article = save(
        &mut repo,
        &mut index,
        Article::new(draft("menabrea1843", vec![Author::new("Ada", "Lovelace")])),
    );
    let old_id = article.id();
    let owner = OwnerRef::new(old_id, EntityKind::Article);
    let tag = save(&mut repo, &mut index, Tag::new(owner, "engine").unwrap());
    let note = save(
        &mut repo,
        &mut index,
        Annotation::new(owner, "Note G", "first program").unwrap(),
    );
    let note_tag = save(
        &mut repo,
        &mut index,
        Tag::new(OwnerRef::new(note.id(), EntityKind::Annotation), "bernoulli").unwrap(),
    );
    let citing = save(
        &mut repo,
        &mut index,
        Article::new(draft("babbage1864", vec![Author::new("Charles", "Babbage")])),
    );
    let citation = save(
        &mut repo,
        &mut index,
        Reference::new(OwnerRef::new(citing.id(), EntityKind::Article), old_id).unwrap(),
    );

    article.edit("title", "Notes on the Analytical Engine").unwrap();
    let new_id = article.id();
    let report = repo.save(Some(&mut article), &mut index).unwrap();

    for old in [old_id, tag.id(), note.id(), note_tag.id(), citation.id()] {
        assert!(!index.contains(old), "stale id {old} still indexed");
    }
    let moved = |old| {
        report
            .rekeyed
            .iter()
            .find(|rekey| rekey.old_id == old)
            .map(|rekey| rekey.new_id)
            .unwrap()
    };

    let moved_tag = repo.fetch(moved(tag.id()), EntityKind::Tag).unwrap();
    assert_eq!(moved_tag.owner().unwrap().id, new_id);

    let moved_note = repo
        .fetch(moved(note.id()), EntityKind::Annotation)
        .unwrap();
    assert_eq!(moved_note.owner().unwrap().id, new_id);

    let moved_note_tag = repo.fetch(moved(note_tag.id()), EntityKind::Tag).unwrap();
    assert_eq!(moved_note_tag.owner().unwrap().id, moved_note.id());

    let Entity::Reference(moved_citation) = repo
        .fetch(moved(citation.id()), EntityKind::Reference)
        .unwrap()
    else {
        panic!("expected a reference");
    };
    assert_eq!(moved_citation.target(), new_id);
    assert_eq!(moved_citation.owner().id, citing.id());

    for (id, kind) in repo.identities().unwrap() {
        assert_eq!(index.resolve(id).unwrap(), kind);
    }
    assert_eq!(index.len(), repo.identities().unwrap().len());
}

#[test]
fn renaming_an_author_rekeys_their_articles() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteStashRepository::try_new(&mut conn).unwrap();
    let mut index = IdentityIndex::new();

    let article = save(
        &mut repo,
        &mut index,
        Article::new(draft("menabrea1843", vec![Author::new("Ada", "Lovelace")])),
    );
    let mut author = repo
        .fetch(Author::new("Ada", "Lovelace").id(), EntityKind::Author)
        .unwrap();
    author.edit("lastname", "King").unwrap();
    let report = repo.save(Some(&mut author), &mut index).unwrap();

    let article_rekey = report
        .rekeyed
        .iter()
        .find(|rekey| rekey.kind == EntityKind::Article)
        .unwrap();
    assert_eq!(article_rekey.old_id, article.id());
    assert!(!repo.exists(article.id(), EntityKind::Article).unwrap());

    let Entity::Article(moved) = repo
        .fetch(article_rekey.new_id, EntityKind::Article)
        .unwrap()
    else {
        panic!("expected an article");
    };
    assert_eq!(moved.authors()[0].last_name(), "King");
    assert_eq!(moved.id(), article_rekey.new_id);
    assert!(!moved.identity().is_dirty());
}

#[test]
fn rekey_onto_an_existing_row_merges_dependents() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let mut repo = SqliteStashRepository::try_new(&mut conn).unwrap();
        let mut index = IdentityIndex::new();

        let mut lovelace = save(&mut repo, &mut index, Author::new("Ada", "Lovelace"));
        let king = save(&mut repo, &mut index, Author::new("Ada", "King"));
        save(
            &mut repo,
            &mut index,
            Tag::new(OwnerRef::new(lovelace.id(), EntityKind::Author), "countess").unwrap(),
        );
        let kept_tag = save(
            &mut repo,
            &mut index,
            Tag::new(OwnerRef::new(king.id(), EntityKind::Author), "countess").unwrap(),
        );

        lovelace.edit("lastname", "King").unwrap();
        assert_eq!(lovelace.id(), king.id());
        let report = repo.save(Some(&mut lovelace), &mut index).unwrap();
        assert!(report.inserted.is_empty());
        assert!(repo.exists(kept_tag.id(), EntityKind::Tag).unwrap());
        assert_eq!(index.len(), 2);
    }
    assert_eq!(count_rows(&conn, "authors"), 1);
    assert_eq!(count_rows(&conn, "tags"), 1);
}

#[test]
fn row_under_stale_id_hydrates_dirty_and_is_repaired_on_save() {
    let mut conn = open_db_in_memory().unwrap();
    let stale_id = uuid::Uuid::new_v4();
    conn.execute(
        "INSERT INTO authors (uuid, first_name, last_name) VALUES (?1, 'Ada', 'Lovelace');",
        [stale_id.to_string()],
    )
    .unwrap();

    let mut repo = SqliteStashRepository::try_new(&mut conn).unwrap();
    let mut index = IdentityIndex::from_entries(repo.identities().unwrap()).unwrap();
    let mut author = repo.fetch(stale_id, EntityKind::Author).unwrap();
    assert!(author.is_dirty());
    assert_eq!(author.prior(), Some(stale_id));
    assert_eq!(author.id(), Author::new("Ada", "Lovelace").id());

    repo.save(Some(&mut author), &mut index).unwrap();
    assert!(!repo.exists(stale_id, EntityKind::Author).unwrap());
    assert!(repo.exists(author.id(), EntityKind::Author).unwrap());
    assert!(!index.contains(stale_id));
}

#[test]
fn list_all_renders_owner_labels_and_handles_empty_tables() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteStashRepository::try_new(&mut conn).unwrap();
    let mut index = IdentityIndex::new();
    assert!(repo.list_all(EntityKind::Tag).unwrap().is_empty());

    let ada = save(&mut repo, &mut index, Author::new("Ada", "Lovelace"));
    save(
        &mut repo,
        &mut index,
        Tag::new(OwnerRef::new(ada.id(), EntityKind::Author), "pioneer").unwrap(),
    );

    let authors = repo.list_all(EntityKind::Author).unwrap();
    assert_eq!(authors, vec![format!("{}  Lovelace, Ada", ada.id())]);

    let tags = repo.list_all(EntityKind::Tag).unwrap();
    assert_eq!(tags.len(), 1);
    assert!(tags[0].contains("#pioneer"));
    assert!(tags[0].ends_with("on author \"Lovelace, Ada\""));
}
