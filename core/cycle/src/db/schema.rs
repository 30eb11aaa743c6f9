table! {
    rosca_group (id) {
        id -> Text,
        name -> Text,
        contribution_amount -> Text,
        cycle_frequency -> Integer,
        status -> Integer,
        pause_reason -> Nullable<Integer>,
        cycle_started -> Bool,
        next_cycle_date -> Nullable<Timestamp>,
        future_cycles -> Text,
        total_debited -> Text,
        total_pending -> Text,
        total_success -> Text,
        created_ts -> Timestamp,
        updated_ts -> Timestamp,
    }
}

table! {
    group_member (id) {
        id -> Text,
        group_id -> Text,
        user_id -> Text,
        payout_order -> Integer,
        status -> Integer,
        has_been_paid -> Bool,
        is_admin -> Bool,
        account_ref -> Nullable<Text>,
        mandate_ref -> Nullable<Text>,
        created_ts -> Timestamp,
    }
}

table! {
    payment (id) {
        id -> Text,
        group_id -> Text,
        member_id -> Text,
        cycle_number -> Integer,
        amount -> Text,
        status -> Integer,
        retry_count -> Integer,
        gateway_intent_id -> Nullable<Text>,
        created_ts -> Timestamp,
        updated_ts -> Timestamp,
    }
}

table! {
    payout (id) {
        id -> Text,
        group_id -> Text,
        member_id -> Text,
        cycle_number -> Integer,
        amount -> Text,
        status -> Integer,
        gateway_transfer_id -> Nullable<Text>,
        created_ts -> Timestamp,
        updated_ts -> Timestamp,
    }
}

table! {
    scheduled_job (id) {
        id -> Text,
        kind -> Integer,
        group_id -> Nullable<Text>,
        payment_id -> Nullable<Text>,
        payload -> Nullable<Text>,
        state -> Integer,
        not_before_ts -> Timestamp,
        lease_expires_ts -> Nullable<Timestamp>,
        attempt -> Integer,
        max_attempts -> Integer,
        last_error -> Nullable<Text>,
        created_ts -> Timestamp,
        finished_ts -> Nullable<Timestamp>,
    }
}

table! {
    webhook_event (id) {
        id -> Text,
        kind -> Text,
        payload -> Text,
        received_ts -> Timestamp,
        applied -> Bool,
    }
}

table! {
    job_log (id) {
        id -> Integer,
        job_kind -> Nullable<Integer>,
        group_id -> Nullable<Text>,
        cycle_number -> Nullable<Integer>,
        severity -> Integer,
        message -> Text,
        created_ts -> Timestamp,
    }
}

joinable!(group_member -> rosca_group (group_id));
joinable!(payment -> rosca_group (group_id));
joinable!(payout -> rosca_group (group_id));

allow_tables_to_appear_in_same_query!(
    rosca_group,
    group_member,
    payment,
    payout,
    scheduled_job,
    webhook_event,
    job_log,
);
