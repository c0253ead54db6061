table! {
    files (paste, position) {
        paste -> Text,
        position -> Integer,
        hash -> Text,
        name -> Text,
    }
}

table! {
    pastes (id) {
        id -> Text,
        owner -> Text,
    }
}

table! {
    users (username) {
        username -> Text,
        password -> Text,
        token -> Nullable<Text>,
    }
}

joinable!(files -> pastes (paste));
joinable!(pastes -> users (owner));

allow_tables_to_appear_in_same_query!(
    files,
    pastes,
    users,
);
