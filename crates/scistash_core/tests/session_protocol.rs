use rusqlite::Connection;
use scistash_core::{
    derive_id, open_db_in_memory, Article, ArticleDraft, Author, CascadeAll, CascadeNone,
    CommitOutcome, Entity, EntityKind, FieldError, IndexError, OwnerRef, SessionError, SessionState,
    SqliteStashRepository, StagingError, StashConfig, StashRepository, StashSession, Tag,
};

fn session(conn: &mut Connection) -> StashSession<SqliteStashRepository<'_>> {
    StashSession::new(SqliteStashRepository::try_new(conn).unwrap()).unwrap()
}

fn draft(authors: Vec<Author>) -> ArticleDraft {
    ArticleDraft {
        refkey: "menabrea1843".to_string(),
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
fn ada_lovelace_becomes_ada_king() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    let old_id = derive_id(EntityKind::Author, b"AdaLovelace");
    let new_id = derive_id(EntityKind::Author, b"AdaKing");

    let held = session.begin(Author::new("Ada", "Lovelace")).unwrap();
    assert_eq!(held.id(), old_id);
    session.save().unwrap();
    assert_eq!(session.state(), SessionState::Empty);

    session.checkout(old_id).unwrap();
    session.edit("lastname", "King").unwrap();
    let held = session.current().unwrap();
    assert_eq!(held.id(), new_id);
    assert_eq!(held.prior(), Some(old_id));
    assert_eq!(held.derive_id(), held.id());

    let report = session.save().unwrap();
    assert_eq!(report.replaced, Some(old_id));
    let repo = session.repository();
    assert!(!repo.exists(old_id, EntityKind::Author).unwrap());
    assert!(repo.exists(new_id, EntityKind::Author).unwrap());
    assert!(matches!(
        session.checkout(old_id),
        Err(SessionError::UnknownIdentifier(id)) if id == old_id
    ));
}

#[test]
fn checkout_of_unknown_id_fails_and_keeps_state() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    let id = derive_id(EntityKind::Author, b"NobodyHere");

    assert!(matches!(
        session.checkout(id),
        Err(SessionError::UnknownIdentifier(_))
    ));
    assert_eq!(session.state(), SessionState::Empty);
}

#[test]
fn edits_and_saves_need_a_held_entity() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);

    assert!(matches!(
        session.edit("lastname", "King"),
        Err(SessionError::NoCurrentEntity)
    ));
    assert!(matches!(session.save(), Err(SessionError::NoCurrentEntity)));
    assert!(matches!(
        session.tag_current("pioneer"),
        Err(SessionError::NoCurrentEntity)
    ));
    session.discard().unwrap();
}

#[test]
fn unknown_or_malformed_fields_are_rejected() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    session.begin(Article::new(draft(Vec::new()))).unwrap();
    let before = session.current().unwrap().id();

    assert!(matches!(
        session.edit("colour", "blue"),
        Err(SessionError::InvalidField(FieldError::UnknownField { .. }))
    ));
    assert!(matches!(
        session.edit("year", "eighteen forty-three"),
        Err(SessionError::InvalidField(FieldError::InvalidValue { .. }))
    ));
    assert_eq!(session.current().unwrap().id(), before);
}

#[test]
fn rekeyed_staged_entity_answers_to_its_old_id() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    session.begin(Author::new("Charles", "Babbage")).unwrap();
    let charles = session.save().unwrap().id;

    let original = session.begin(Author::new("Ada", "Lovelace")).unwrap().id();
    session.checkout(charles).unwrap();
    assert!(session.staging().contains(original, EntityKind::Author));

    session.checkout(original).unwrap();
    session.edit("lastname", "King").unwrap();
    let rekeyed = session.current().unwrap().id();
    assert_eq!(session.checkout(original).unwrap().id(), rekeyed);
    session.checkout(charles).unwrap();

    assert!(!session.index().contains(original));
    assert_eq!(session.checkout(original).unwrap().id(), rekeyed);
    assert_eq!(session.state(), SessionState::Held(rekeyed));
    session.checkout(charles).unwrap();
    assert_eq!(session.checkout(rekeyed).unwrap().id(), rekeyed);
}

#[test]
fn edited_durable_entity_parked_in_staging_shadows_its_stored_row() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    session.begin(Author::new("Charles", "Babbage")).unwrap();
    let babbage = session.save().unwrap().id;
    session.begin(Author::new("Ada", "Lovelace")).unwrap();
    let lovelace = session.save().unwrap().id;

    session.checkout(lovelace).unwrap();
    session.edit("lastname", "King").unwrap();
    let king = session.current().unwrap().id();
    session.checkout(babbage).unwrap();
    assert!(session.staging().contains(king, EntityKind::Author));

    let held = session.checkout(lovelace).unwrap();
    assert_eq!(held.id(), king);
    assert_eq!(held.prior(), Some(lovelace));
    assert!(!session.staging().contains(king, EntityKind::Author));

    session.checkout(babbage).unwrap();
    session.commit_staged().unwrap();
    let repo = session.repository();
    assert!(!repo.exists(lovelace, EntityKind::Author).unwrap());
    assert!(repo.exists(king, EntityKind::Author).unwrap());
    assert_eq!(session.list_all(EntityKind::Author).unwrap().len(), 2);
}

#[test]
fn staged_article_follows_its_renamed_author() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    let ada = Author::new("Ada", "Lovelace");
    let lovelace = session.stage_new(ada.clone()).unwrap();
    let before = session.stage_new(Article::new(draft(vec![ada]))).unwrap();

    session.checkout(lovelace).unwrap();
    session.edit("lastname", "King").unwrap();
    let king = session.save().unwrap().id;

    let staged = session.staging().entities(EntityKind::Article);
    assert_eq!(staged.len(), 1);
    let article = staged[0].id();
    assert_ne!(article, before);
    assert!(!session.index().contains(before));

    session.commit_staged().unwrap();
    let authors = session.list_all(EntityKind::Author).unwrap();
    assert_eq!(authors.len(), 1);
    assert!(authors[0].contains("King"));

    let repo = session.repository();
    assert!(!repo.exists(lovelace, EntityKind::Author).unwrap());
    match repo.fetch(article, EntityKind::Article).unwrap() {
        Entity::Article(stored) => assert_eq!(stored.author_ids(), vec![king]),
        other => panic!("expected an article, got {other}"),
    }
}

#[test]
fn durable_unchanged_entity_is_not_staged_when_parked() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    session.begin(Author::new("Ada", "Lovelace")).unwrap();
    let ada = session.save().unwrap().id;
    session.begin(Author::new("Charles", "Babbage")).unwrap();
    let charles = session.save().unwrap().id;

    session.checkout(ada).unwrap();
    session.checkout(charles).unwrap();
    assert!(session.staging().is_empty());
    assert!(session.index().contains(ada));
}

#[test]
fn noop_save_keeps_the_entity_held() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    session.begin(Author::new("Ada", "Lovelace")).unwrap();
    let ada = session.save().unwrap().id;

    session.checkout(ada).unwrap();
    for _ in 0..2 {
        assert!(matches!(session.save(), Err(SessionError::NoOpSave(id)) if id == ada));
        assert_eq!(session.state(), SessionState::Held(ada));
    }
    assert_eq!(session.list_all(EntityKind::Author).unwrap().len(), 1);
}

#[test]
fn staging_the_same_entity_twice_is_rejected() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    let id = session.stage_new(Author::new("Ada", "Lovelace")).unwrap();

    assert!(matches!(
        session.stage_new(Author::new("Ada", "Lovelace")),
        Err(SessionError::AlreadyStaged(staged)) if staged == id
    ));
    assert_eq!(session.staging().len(), 1);
}

#[test]
fn discard_all_staged_unregisters_everything() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    let ada = session.stage_new(Author::new("Ada", "Lovelace")).unwrap();
    let charles = session.stage_new(Author::new("Charles", "Babbage")).unwrap();
    let tag = session
        .stage_new(Tag::new(OwnerRef::new(ada, EntityKind::Author), "pioneer").unwrap())
        .unwrap();

    assert_eq!(session.discard_all_staged(), 3);
    assert!(session.staging().is_empty());
    for id in [ada, charles, tag] {
        assert!(matches!(
            session.index().resolve(id),
            Err(IndexError::UnknownIdentifier(_))
        ));
    }
}

#[test]
fn discarding_a_staged_owner_leaves_its_tags_staged() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    let ada = session.stage_new(Author::new("Ada", "Lovelace")).unwrap();
    let tag = session
        .stage_new(Tag::new(OwnerRef::new(ada, EntityKind::Author), "pioneer").unwrap())
        .unwrap();

    session.discard_staged(ada).unwrap();
    assert!(session.staging().contains(tag, EntityKind::Tag));
    assert!(matches!(
        session.discard_staged(ada),
        Err(SessionError::UnknownIdentifier(_))
    ));
}

#[test]
fn staged_tag_follows_its_owner_and_commits_after_it() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    session.begin(Author::new("Ada", "Lovelace")).unwrap();
    let tag_before = session.tag_current("pioneer").unwrap();
    session.edit("lastname", "King").unwrap();
    let king = session.current().unwrap().id();

    let staged_tag = &session.staging().entities(EntityKind::Tag)[0];
    assert_eq!(staged_tag.owner().unwrap().id, king);
    assert_ne!(staged_tag.id(), tag_before);
    assert!(!session.index().contains(tag_before));

    session.save().unwrap();
    session
        .stage_new(Author::new("Charles", "Babbage"))
        .unwrap();
    let outcomes = session.commit_staged().unwrap();
    let kinds: Vec<EntityKind> = outcomes
        .iter()
        .map(|outcome| match outcome {
            CommitOutcome::Saved(report) => report.kind,
            CommitOutcome::Unchanged { kind, .. } => *kind,
        })
        .collect();
    assert_eq!(kinds, vec![EntityKind::Author, EntityKind::Tag]);
    assert!(session.staging().is_empty());

    let tags = session.list_all(EntityKind::Tag).unwrap();
    assert_eq!(tags.len(), 1);
    assert!(tags[0].ends_with("on author \"King, Ada\""));
}

#[test]
fn committing_a_durable_duplicate_reports_unchanged() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    session.begin(Author::new("Ada", "Lovelace")).unwrap();
    let ada = session.save().unwrap().id;

    session.stage_new(Author::new("Ada", "Lovelace")).unwrap();
    let outcomes = session.commit_staged().unwrap();
    assert_eq!(
        outcomes,
        vec![CommitOutcome::Unchanged {
            id: ada,
            kind: EntityKind::Author
        }]
    );
    assert_eq!(session.index().resolve(ada).unwrap(), EntityKind::Author);
}

#[test]
fn staging_quota_comes_from_config() {
    let mut conn = open_db_in_memory().unwrap();
    let config = StashConfig::dry_run().with_memory_quota(8);
    let repo = SqliteStashRepository::try_new(&mut conn).unwrap();
    let mut session = StashSession::from_config(repo, &config).unwrap();

    session.begin(Author::new("Ada", "Lovelace")).unwrap();
    session
        .attach_file_to_current("a.txt", "text/plain", "", b"12345".to_vec())
        .unwrap();
    let err = session
        .attach_file_to_current("b.txt", "text/plain", "", b"6789".to_vec())
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Staging(StagingError::QuotaExceeded {
            requested: 4,
            available: 3,
            ..
        })
    ));
}

#[test]
fn attach_path_reads_the_file_from_disk() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note-g.txt");
    std::fs::write(&path, b"Bernoulli numbers").unwrap();

    session.begin(Author::new("Ada", "Lovelace")).unwrap();
    let id = session
        .attach_path_to_current(&path, "text/plain", "Note G")
        .unwrap();
    let pending = session.pending(EntityKind::File);
    assert_eq!(pending.len(), 1);
    assert!(session.staging().contains(id, EntityKind::File));

    let missing = session.attach_path_to_current(dir.path().join("absent.txt"), "text/plain", "");
    assert!(matches!(missing, Err(SessionError::Model(_))));
}

#[test]
fn hash_collision_across_kinds_propagates_and_keeps_entity_held() {
    let mut conn = open_db_in_memory().unwrap();
    let ada = derive_id(EntityKind::Author, b"AdaLovelace");
    conn.execute(
        "INSERT INTO tags (uuid, owner_uuid, owner_kind, text) VALUES (?1, ?2, 'author', 'x');",
        [ada.to_string(), uuid::Uuid::new_v4().to_string()],
    )
    .unwrap();

    let mut session = session(&mut conn);
    session.begin(Author::new("Ada", "Lovelace")).unwrap();
    let err = session.save().unwrap_err();
    match err {
        SessionError::DuplicateIdentifierConflict(IndexError::DuplicateIdentifierConflict {
            id,
            registered,
            attempted,
        }) => {
            assert_eq!(id, ada);
            assert_eq!(registered, EntityKind::Tag);
            assert_eq!(attempted, EntityKind::Author);
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Held(ada));
    assert!(!session
        .repository()
        .exists(ada, EntityKind::Author)
        .unwrap());
}

#[test]
fn article_author_list_edits() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    session.begin(Author::new("Charles", "Babbage")).unwrap();
    let charles = session.save().unwrap().id;

    session.begin(Author::new("Ada", "Lovelace")).unwrap();
    assert!(matches!(
        session.remove_author(charles),
        Err(SessionError::NotArticle(EntityKind::Author))
    ));
    session.discard().unwrap();

    session
        .begin(Article::new(draft(vec![Author::new("Ada", "Lovelace")])))
        .unwrap();
    let before = session.current().unwrap().id();
    assert!(session.add_author(charles).unwrap());
    assert!(!session.add_author(charles).unwrap());
    assert_ne!(session.current().unwrap().id(), before);
    assert!(session.remove_author(charles).unwrap());
    assert_eq!(session.current().unwrap().id(), before);
}

#[test]
fn delete_resolves_kind_and_honors_policy() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    session.begin(Author::new("Ada", "Lovelace")).unwrap();
    session.tag_current("pioneer").unwrap();
    let ada = session.save().unwrap().id;
    session.commit_staged().unwrap();

    session.begin(Author::new("Charles", "Babbage")).unwrap();
    session.tag_current("engine").unwrap();
    let charles = session.save().unwrap().id;
    session.commit_staged().unwrap();

    let report = session.delete(ada, &mut CascadeAll).unwrap();
    assert_eq!(report.removed.len(), 2);
    let report = session.delete(charles, &mut CascadeNone).unwrap();
    assert_eq!(report.removed.len(), 1);
    assert_eq!(session.list_all(EntityKind::Tag).unwrap().len(), 1);

    assert!(matches!(
        session.delete(ada, &mut CascadeAll),
        Err(SessionError::UnknownIdentifier(_))
    ));
}

#[test]
fn finish_reports_dropped_staged_entities() {
    let mut conn = open_db_in_memory().unwrap();
    let mut session = session(&mut conn);
    session.stage_new(Author::new("Ada", "Lovelace")).unwrap();
    session.begin(Author::new("Charles", "Babbage")).unwrap();
    session.tag_current("engine").unwrap();

    assert_eq!(session.finish(), 2);
}
