diesel::table! {
    reminders (id) {
        id -> Integer,
        encrypted_task -> Binary,
        encrypted_time -> Binary,
        completed -> Bool,
        fired -> Bool,
        created_at -> BigInt,
    }
}

diesel::table! {
    vault_meta (id) {
        id -> Integer,
        salt -> Binary,
        kdf_algorithm -> Text,
        kdf_version -> Integer,
        kdf_memory_kib -> Integer,
        kdf_iterations -> Integer,
        kdf_parallelism -> Integer,
        kdf_output_len -> Integer,
        canary -> Binary,
        created_at -> BigInt,
    }
}
