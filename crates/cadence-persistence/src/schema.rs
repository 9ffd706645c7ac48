//! Esquema Diesel (declarado manualmente). Reemplazable con `diesel print-schema`.

diesel::table! {
    event_log (seq) {
        seq -> BigInt,
        execution_id -> Uuid,
        ts -> Timestamptz,
        event_type -> Text,
        payload -> Jsonb,
    }
}

diesel::table! {
    delivery_receipts (id) {
        id -> BigInt,
        execution_id -> Uuid,
        step_id -> Text,
        sequence_version -> Integer,
        message_id -> Text,
        recorded_in_seq -> BigInt,
        ts -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    event_log,
    delivery_receipts,
);
