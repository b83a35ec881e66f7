// Diesel table definitions. Kept in sync by hand with `repository::migrations`.
// PRIMARY KEY columns are not nullable.

diesel::table! {
    restaurants (id) {
        id -> Integer,
        name -> Text,
        domain -> Text,
        brand -> Text,
        slug -> Text,
        address -> Nullable<Text>,
        phone -> Nullable<Text>,
        rating -> Nullable<Text>,
        delivery_fee -> Nullable<Text>,
        minimum_order -> Nullable<Text>,
        delivery_time -> Nullable<Text>,
        source_url -> Nullable<Text>,
        last_scraped_at -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    categories (id) {
        id -> Integer,
        restaurant_id -> Integer,
        name -> Text,
        normalized_name -> Text,
        description -> Nullable<Text>,
        display_order -> Integer,
        source -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    products (id) {
        id -> Integer,
        restaurant_id -> Integer,
        category_id -> Integer,
        external_id -> Nullable<Text>,
        name -> Text,
        description -> Nullable<Text>,
        image_url -> Nullable<Text>,
        options -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    offers (id) {
        id -> Integer,
        restaurant_id -> Integer,
        name -> Text,
        normalized_name -> Text,
        offer_type -> Text,
        discount_percentage -> Nullable<Text>,
        discount_amount -> Nullable<Text>,
        is_active -> Integer,
        start_date -> Text,
        end_date -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    product_prices (id) {
        id -> Integer,
        product_id -> Integer,
        session_id -> Nullable<Text>,
        price -> Text,
        original_price -> Nullable<Text>,
        discount_percentage -> Nullable<Text>,
        currency -> Text,
        availability -> Integer,
        offer_id -> Nullable<Integer>,
        offer_name -> Nullable<Text>,
        scraped_at -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    scraping_sessions (id) {
        id -> Text,
        restaurant_id -> Nullable<Integer>,
        restaurant_name -> Nullable<Text>,
        source -> Text,
        content_hash -> Nullable<Text>,
        scraped_at -> Nullable<Text>,
        started_at -> Text,
        completed_at -> Nullable<Text>,
        status -> Text,
        product_count -> Integer,
        category_count -> Integer,
        created_count -> Integer,
        updated_count -> Integer,
        warnings -> Text,
        errors -> Text,
        error_message -> Nullable<Text>,
    }
}

diesel::table! {
    schema_migrations (version) {
        version -> Integer,
        name -> Text,
        applied_at -> Text,
    }
}

diesel::joinable!(categories -> restaurants (restaurant_id));
diesel::joinable!(products -> restaurants (restaurant_id));
diesel::joinable!(products -> categories (category_id));
diesel::joinable!(offers -> restaurants (restaurant_id));
diesel::joinable!(product_prices -> products (product_id));
diesel::joinable!(product_prices -> offers (offer_id));
diesel::joinable!(scraping_sessions -> restaurants (restaurant_id));

diesel::allow_tables_to_appear_in_same_query!(
    restaurants,
    categories,
    products,
    offers,
    product_prices,
    scraping_sessions,
    schema_migrations,
);
