// Espalier schema - page store tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    sites (id) {
        id -> Integer,
        name -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    documents (id) {
        id -> Integer,
        current_revision_id -> Nullable<Integer>,
        owner_id -> Nullable<Integer>,
        group_id -> Nullable<Integer>,
        group_read -> Bool,
        group_write -> Bool,
        other_read -> Bool,
        other_write -> Bool,
        created_at -> Text,
        modified_at -> Text,
    }
}

diesel::table! {
    revisions (id) {
        id -> Integer,
        document_id -> Integer,
        revision_number -> Integer,
        title -> Text,
        content -> Text,
        user_message -> Text,
        automatic_log -> Text,
        deleted -> Bool,
        locked -> Bool,
        previous_revision_id -> Nullable<Integer>,
        user_id -> Nullable<Integer>,
        ip_address -> Nullable<Text>,
        created_at -> Text,
        modified_at -> Text,
    }
}

diesel::table! {
    tree_nodes (id) {
        id -> Integer,
        site_id -> Integer,
        parent_id -> Nullable<Integer>,
        slug -> Nullable<Text>,
        document_id -> Nullable<Integer>,
        created_at -> Text,
    }
}

diesel::table! {
    object_bindings (id) {
        id -> Integer,
        document_id -> Integer,
        target_kind -> Text,
        target_id -> Integer,
        is_hierarchical -> Bool,
        created_at -> Text,
    }
}
