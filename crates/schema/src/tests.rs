use super::*;
use catalog::RelationKind;
use pretty_assertions::assert_eq;

const SDL: &str = r#"
enum Status {
  ACTIVE
  INACTIVE
}

type Author {
  id: ID!
  name: String!
  posts: [Post!]!
}

type Post {
  id: ID!
  title: String!
  status: Status!
  author: Author!
  tags: [String!]!
  collaborators: [Author!]!
}
"#;

fn config() -> StoreConfig {
    StoreConfig::default()
}

#[test]
fn derives_scalar_and_enum_columns() {
    let loaded = load_schema(SDL).unwrap();
    let post = loaded.tables.iter().find(|t| t.name == "Post").unwrap();

    assert_eq!(post.column("title").unwrap().kind, ScalarKind::String);
    let status = post.column("status").unwrap();
    assert_eq!(status.kind, ScalarKind::String);
    assert_eq!(status.enum_name.as_deref(), Some("Status"));

    assert_eq!(loaded.enums.len(), 1);
    assert_eq!(loaded.enums[0].name, "Status");
    assert_eq!(loaded.enums[0].values, vec!["ACTIVE", "INACTIVE"]);
}

#[test]
fn forward_scalar_relation_gets_local_foreign_key_column() {
    let loaded = load_schema(SDL).unwrap();
    let post = loaded.tables.iter().find(|t| t.name == "Post").unwrap();

    let fk = post.column("authorId").expect("authorId column");
    assert_eq!(fk.kind, ScalarKind::Id);
    assert!(!fk.is_list);

    let relation = post.relation("author").unwrap();
    assert_eq!(relation.kind, RelationKind::BelongsTo);
    assert_eq!(relation.related_table, "Author");
    assert_eq!(relation.foreign_key_field, "authorId");
}

#[test]
fn forward_list_relation_without_backref_gets_local_ids_column() {
    let loaded = load_schema(SDL).unwrap();
    let post = loaded.tables.iter().find(|t| t.name == "Post").unwrap();

    let fk = post.column("collaboratorIds").expect("collaboratorIds column");
    assert_eq!(fk.kind, ScalarKind::Id);
    assert!(fk.is_list);

    let relation = post.relation("collaborators").unwrap();
    assert_eq!(relation.kind, RelationKind::BelongsTo);
    assert_eq!(relation.foreign_key_field, "collaboratorIds");
}

#[test]
fn reverse_one_to_many_has_no_local_column() {
    let loaded = load_schema(SDL).unwrap();
    let author = loaded.tables.iter().find(|t| t.name == "Author").unwrap();

    assert!(!author.has_column("posts"));
    assert!(!author.has_column("postIds"));

    let relation = author.relation("posts").unwrap();
    assert_eq!(relation.kind, RelationKind::HasMany);
    assert_eq!(relation.related_table, "Post");
    assert_eq!(relation.foreign_key_field, "authorId");
}

#[test]
fn rejects_field_of_unknown_type() {
    let sdl = r#"
        type Orphan {
          id: ID!
          owner: Ghost!
        }
    "#;
    let err = load_schema(sdl).unwrap_err();
    assert!(matches!(err, DbError::SchemaMismatch(_)));
}

#[test]
fn rejects_sdl_with_no_object_types() {
    let sdl = "scalar DateTime";
    let err = load_schema(sdl).unwrap_err();
    assert!(matches!(err, DbError::Invalid(_)));
}

#[test]
fn synthesizes_id_column_when_absent() {
    let sdl = r#"
        type Tag {
          name: String!
        }
    "#;
    let loaded = load_schema(sdl).unwrap();
    let tag = &loaded.tables[0];
    assert!(tag.has_column("id"));
    assert_eq!(tag.primary_key_field, "id");
}

#[test]
fn open_tables_creates_then_reopens_with_widened_schema() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = load_schema(SDL).unwrap();
    let tables = open_tables(dir.path(), &config(), &loaded).unwrap();
    assert_eq!(tables.len(), 2);
    drop(tables);

    let widened_sdl = r#"
        type Author {
          id: ID!
          name: String!
          email: String
          posts: [Post!]!
        }

        type Post {
          id: ID!
          title: String!
          status: Status!
          author: Author!
          tags: [String!]!
          collaborators: [Author!]!
        }

        enum Status {
          ACTIVE
          INACTIVE
        }
    "#;
    let loaded2 = load_schema(widened_sdl).unwrap();
    let mut tables = open_tables(dir.path(), &config(), &loaded2).unwrap();
    let author = tables.get_mut("Author").unwrap();
    assert!(author.metadata().has_column("email"));
}

#[test]
fn load_data_inserts_records_and_skips_unknown_tables() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = load_schema(SDL).unwrap();
    let mut tables = open_tables(dir.path(), &config(), &loaded).unwrap();

    let seed: Json = serde_json::json!({
        "Author": [
            { "id": "a1", "name": "Ada" }
        ],
        "Post": [
            { "id": "p1", "title": "Hello", "status": "ACTIVE", "authorId": "a1", "tags": ["rust"], "collaboratorIds": ["a1"] }
        ],
        "Comment": [
            { "id": "c1", "body": "unreachable" }
        ]
    });
    load_data(&mut tables, &seed).unwrap();

    let author = tables.get_mut("Author").unwrap();
    let a1 = author.find("a1").unwrap().unwrap();
    assert_eq!(a1.get("name"), Some(&Value::String("Ada".into())));

    let post = tables.get_mut("Post").unwrap();
    let p1 = post.find("p1").unwrap().unwrap();
    assert_eq!(p1.get("authorId"), Some(&Value::String("a1".into())));
    assert_eq!(
        p1.get("tags"),
        Some(&Value::List(vec![Value::String("rust".into())]))
    );
}

#[test]
fn load_data_rejects_unknown_field_in_record() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = load_schema(SDL).unwrap();
    let mut tables = open_tables(dir.path(), &config(), &loaded).unwrap();

    let seed: Json = serde_json::json!({
        "Author": [ { "id": "a1", "name": "Ada", "nickname": "Countess" } ]
    });
    let err = load_data(&mut tables, &seed).unwrap_err();
    assert!(matches!(err, DbError::SchemaMismatch(_)));
}
