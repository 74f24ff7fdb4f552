use super::*;
use optimizer::IndexAdvisor;
use pretty_assertions::assert_eq;
use serde_json::json;

const SDL: &str = r#"
    enum Status {
        DRAFT
        PUBLISHED
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

fn seed_data() -> Json {
    json!({
        "Author": [
            { "id": "a1", "name": "Ada" },
            { "id": "a2", "name": "Grace" },
        ],
        "Post": [
            {
                "id": "p1",
                "title": "Hello",
                "status": "PUBLISHED",
                "authorId": "a1",
                "tags": ["rust", "db"],
                "collaboratorIds": ["a1", "a2"],
            },
            {
                "id": "p2",
                "title": "World",
                "status": "DRAFT",
                "authorId": "a2",
                "tags": [],
                "collaboratorIds": ["a1"],
            },
        ],
    })
}

fn setup() -> (Resolver, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = common::StoreConfig::builder().data_dir(dir.path().to_path_buf()).build();
    let loaded = schema::load_schema(SDL).unwrap();
    let mut tables = schema::open_tables(dir.path(), &config, &loaded).unwrap();
    schema::load_data(&mut tables, &seed_data()).unwrap();
    let advisor = IndexAdvisor::from_config(&config);
    (Resolver::new(tables, loaded, advisor), dir)
}

fn no_vars() -> Map<String, Json> {
    Map::new()
}

#[test]
fn resolves_a_single_record_with_a_scalar_belongs_to_relation() {
    let (mut resolver, _dir) = setup();
    let query = r#"
        query {
            post(id: "p1") {
                id
                title
                __typename
                author { id name }
            }
        }
    "#;
    let response = resolver.execute(query, None, &no_vars());
    assert_eq!(response["errors"], Json::Null);
    let post = &response["data"]["post"];
    assert_eq!(post["id"], "p1");
    assert_eq!(post["title"], "Hello");
    assert_eq!(post["__typename"], "Post");
    assert_eq!(post["author"]["name"], "Ada");
}

#[test]
fn missing_record_resolves_to_null_without_an_error() {
    let (mut resolver, _dir) = setup();
    let response = resolver.execute(r#"query { post(id: "nope") { id } }"#, None, &no_vars());
    assert_eq!(response["data"]["post"], Json::Null);
    assert_eq!(response["errors"], Json::Null);
}

#[test]
fn connection_applies_where_order_by_and_pagination() {
    let (mut resolver, _dir) = setup();
    let query = r#"
        query {
            posts {
                items(where: { status: { equals: "PUBLISHED" } }, orderBy: { title: "asc" }) {
                    id
                    title
                }
            }
        }
    "#;
    let response = resolver.execute(query, None, &no_vars());
    assert_eq!(response["errors"], Json::Null);
    let items = response["data"]["posts"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "p1");
    assert_eq!(response["data"]["posts"]["totalCount"], 1);
}

#[test]
fn connection_total_count_reflects_the_filtered_but_unpaginated_result() {
    let (mut resolver, _dir) = setup();
    let query = r#"
        query {
            posts {
                items(orderBy: { id: "asc" }, skip: 1, take: 1) { id }
                totalCount
            }
        }
    "#;
    let response = resolver.execute(query, None, &no_vars());
    assert_eq!(response["errors"], Json::Null);
    let items = response["data"]["posts"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(response["data"]["posts"]["totalCount"], 2);
}

#[test]
fn connection_skip_and_take_paginate_the_sorted_result() {
    let (mut resolver, _dir) = setup();
    let query = r#"
        query {
            posts {
                items(orderBy: { id: "asc" }, skip: 1, take: 1) { id }
            }
        }
    "#;
    let response = resolver.execute(query, None, &no_vars());
    let items = response["data"]["posts"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "p2");
}

#[test]
fn reverse_has_many_relation_batches_across_parents() {
    let (mut resolver, _dir) = setup();
    let query = r#"
        query {
            authors {
                items { id posts { id title } }
            }
        }
    "#;
    let response = resolver.execute(query, None, &no_vars());
    assert_eq!(response["errors"], Json::Null);
    let items = response["data"]["authors"]["items"].as_array().unwrap();
    let ada = items.iter().find(|a| a["id"] == "a1").unwrap();
    let ada_posts: Vec<&str> = ada["posts"].as_array().unwrap().iter().map(|p| p["id"].as_str().unwrap()).collect();
    assert_eq!(ada_posts, vec!["p1"]);

    let grace = items.iter().find(|a| a["id"] == "a2").unwrap();
    let grace_posts: Vec<&str> = grace["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(grace_posts, vec!["p2"]);
}

#[test]
fn list_belongs_to_relation_resolves_every_collaborator() {
    let (mut resolver, _dir) = setup();
    let query = r#"
        query {
            post(id: "p1") {
                collaborators { id name }
            }
        }
    "#;
    let response = resolver.execute(query, None, &no_vars());
    assert_eq!(response["errors"], Json::Null);
    let names: Vec<&str> = response["data"]["post"]["collaborators"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Ada", "Grace"]);
}

#[test]
fn create_mutation_synthesizes_an_id_when_absent() {
    let (mut resolver, _dir) = setup();
    let mutation = r#"
        mutation {
            createAuthor(input: { name: "Margaret" }) {
                id
                name
            }
        }
    "#;
    let response = resolver.execute(mutation, None, &no_vars());
    assert_eq!(response["errors"], Json::Null);
    let created = &response["data"]["createAuthor"];
    assert_eq!(created["name"], "Margaret");
    assert!(created["id"].as_str().unwrap().len() > 0);
}

#[test]
fn update_mutation_merges_onto_the_existing_record() {
    let (mut resolver, _dir) = setup();
    let mutation = r#"
        mutation {
            updatePost(id: "p2", input: { status: "PUBLISHED" }) {
                id
                title
                status
            }
        }
    "#;
    let response = resolver.execute(mutation, None, &no_vars());
    assert_eq!(response["errors"], Json::Null);
    let updated = &response["data"]["updatePost"];
    assert_eq!(updated["title"], "World");
    assert_eq!(updated["status"], "PUBLISHED");
}

#[test]
fn delete_mutation_returns_the_removed_record_and_it_stops_resolving() {
    let (mut resolver, _dir) = setup();
    let response = resolver.execute(r#"mutation { deletePost(id: "p1") { id } }"#, None, &no_vars());
    assert_eq!(response["data"]["deletePost"]["id"], "p1");

    let follow_up = resolver.execute(r#"query { post(id: "p1") { id } }"#, None, &no_vars());
    assert_eq!(follow_up["data"]["post"], Json::Null);
}

#[test]
fn an_error_on_one_root_field_does_not_abort_its_siblings() {
    let (mut resolver, _dir) = setup();
    let query = r#"
        query {
            good: post(id: "p1") { id }
            bad: post(id: "p1") { noSuchField }
        }
    "#;
    let response = resolver.execute(query, None, &no_vars());
    assert_eq!(response["data"]["good"]["id"], "p1");
    assert_eq!(response["data"]["bad"], Json::Null);
    let errors = response["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
}

#[test]
fn variables_substitute_into_arguments() {
    let (mut resolver, _dir) = setup();
    let query = r#"query($id: ID!) { post(id: $id) { id } }"#;
    let mut vars = Map::new();
    vars.insert("id".to_string(), json!("p2"));
    let response = resolver.execute(query, None, &vars);
    assert_eq!(response["data"]["post"]["id"], "p2");
}

#[test]
fn introspection_describes_every_derived_type_and_enum() {
    let (resolver, _dir) = setup();
    let described = resolver.introspect();
    let type_names: Vec<&str> = described["types"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(type_names.contains(&"Author"));
    assert!(type_names.contains(&"Post"));

    let post = described["types"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "Post")
        .unwrap();
    let connection_field_names: Vec<&str> = post["connectionFields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(connection_field_names, vec!["items", "totalCount"]);

    let enum_names: Vec<&str> = described["enums"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(enum_names, vec!["Status"]);
}

#[test]
fn close_all_flushes_every_table_without_error() {
    let (mut resolver, _dir) = setup();
    resolver.close_all().unwrap();
}
