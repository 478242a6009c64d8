diesel::table! {
    users (id) {
        id -> Uuid,
        #[max_length = 255]
        email -> Varchar,
        #[max_length = 255]
        password_hash -> Nullable<Varchar>,
        #[max_length = 255]
        google_id -> Nullable<Varchar>,
        #[max_length = 100]
        display_name -> Varchar,
        avatar_url -> Nullable<Text>,
        #[max_length = 20]
        role -> Varchar,
        #[max_length = 20]
        auth_provider -> Varchar,
        is_active -> Bool,
        migrated_local_storage -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    refresh_tokens (id) {
        id -> Uuid,
        user_id -> Uuid,
        #[max_length = 64]
        token_hash -> Varchar,
        family_id -> Uuid,
        is_valid -> Bool,
        expires_at -> Timestamptz,
        last_used_at -> Nullable<Timestamptz>,
        user_agent -> Nullable<Text>,
        #[max_length = 64]
        ip_address -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    user_preferences (user_id) {
        user_id -> Uuid,
    }
}

diesel::table! {
    all_time_stats (user_id) {
        user_id -> Uuid,
    }
}

diesel::joinable!(refresh_tokens -> users (user_id));
diesel::joinable!(user_preferences -> users (user_id));
diesel::joinable!(all_time_stats -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    refresh_tokens,
    user_preferences,
    all_time_stats,
);
