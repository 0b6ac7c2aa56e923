use std::collections::HashMap;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use murmur_db::models::{MessageRow, UserRow};
use murmur_db::parse_created_at;
use murmur_types::api::{Claims, ConversationView};
use murmur_types::UserId;

use crate::error::ApiError;
use crate::{run_blocking, AppState};

/// Reduces a user's full message history to the most recent exchange per
/// counterpart. Rows are re-sorted by (created_at, id) ascending before the
/// last-write-wins scan, so equal timestamps resolve to the higher row id
/// regardless of input order. Output is newest conversation first, ties
/// broken by ascending counterpart id.
pub(crate) fn aggregate(viewer: UserId, mut rows: Vec<MessageRow>) -> Vec<(UserId, MessageRow)> {
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut latest: HashMap<UserId, MessageRow> = HashMap::new();
    for row in rows {
        let counterpart = if row.sender_id == viewer {
            row.receiver_id
        } else {
            row.sender_id
        };
        latest.insert(counterpart, row);
    }

    let mut out: Vec<(UserId, MessageRow)> = latest.into_iter().collect();
    out.sort_by(|(ca, ma), (cb, mb)| mb.created_at.cmp(&ma.created_at).then(ca.cmp(cb)));
    out
}

/// Joins aggregated rows with counterpart profiles. Counterparts missing
/// from the profile set are skipped rather than rendered half-empty.
pub(crate) fn assemble_views(
    viewer: UserId,
    latest: Vec<(UserId, MessageRow)>,
    profiles: &[UserRow],
) -> Vec<ConversationView> {
    latest
        .into_iter()
        .filter_map(|(counterpart_id, row)| {
            let profile = profiles.iter().find(|u| u.id == counterpart_id)?;
            Some(ConversationView {
                id: profile.id,
                username: profile.username.clone(),
                full_name: profile.full_name.clone(),
                image: profile.image.clone(),
                is_online: profile.is_online,
                last_message: row.body.clone(),
                last_message_created_at: parse_created_at(&row.created_at),
                last_message_sender: row.sender_id == viewer,
                seen: row.seen,
            })
        })
        .collect()
}

/// `GET /conversations` — derived on every read from the message history,
/// never stored.
pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub;
    let db = state.db.clone();

    let (latest, profiles) = run_blocking(move || {
        let rows = db.messages_for_user(viewer)?;
        let latest = aggregate(viewer, rows);
        let counterpart_ids: Vec<i64> = latest.iter().map(|(id, _)| *id).collect();
        let profiles = db.get_users_by_ids(&counterpart_ids)?;
        Ok((latest, profiles))
    })
    .await?;

    Ok(Json(assemble_views(viewer, latest, &profiles)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, sender: i64, receiver: i64, body: &str, seen: bool, ts: &str) -> MessageRow {
        MessageRow {
            id,
            sender_id: sender,
            receiver_id: receiver,
            body: body.into(),
            seen,
            created_at: ts.into(),
        }
    }

    #[test]
    fn keeps_only_the_newest_message_per_counterpart() {
        let viewer = 1;
        let rows = vec![
            row(1, 1, 2, "old to bob", true, "2026-08-01 10:00:00"),
            row(2, 2, 1, "newer from bob", false, "2026-08-01 11:00:00"),
            row(3, 1, 3, "to carol", false, "2026-08-01 10:30:00"),
        ];

        let latest = aggregate(viewer, rows);
        assert_eq!(latest.len(), 2);

        let bob = latest.iter().find(|(c, _)| *c == 2).unwrap();
        assert_eq!(bob.1.body, "newer from bob");
    }

    #[test]
    fn equal_timestamps_resolve_to_the_higher_row_id() {
        let viewer = 1;
        // Deliberately out of insertion order.
        let rows = vec![
            row(8, 2, 1, "second", false, "2026-08-01 10:00:00"),
            row(5, 1, 2, "first", false, "2026-08-01 10:00:00"),
        ];

        let latest = aggregate(viewer, rows);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].1.id, 8);
        assert_eq!(latest[0].1.body, "second");
    }

    #[test]
    fn output_is_newest_first_with_counterpart_id_tiebreak() {
        let viewer = 1;
        let rows = vec![
            row(1, 1, 4, "to dave", false, "2026-08-01 09:00:00"),
            row(2, 3, 1, "from carol", false, "2026-08-01 10:00:00"),
            row(3, 5, 1, "from eve", false, "2026-08-01 10:00:00"),
        ];

        let latest = aggregate(viewer, rows);
        let order: Vec<UserId> = latest.iter().map(|(c, _)| *c).collect();
        // Carol and Eve share a timestamp; the lower counterpart id sorts
        // first, then the older Dave thread.
        assert_eq!(order, vec![3, 5, 4]);
    }

    #[test]
    fn views_carry_direction_and_seen_from_the_last_message() {
        let viewer = 1;
        let rows = vec![
            row(1, 1, 2, "alice says hi", false, "2026-08-01 10:00:00"),
            row(2, 2, 1, "bob replies", true, "2026-08-01 11:00:00"),
        ];
        let latest = aggregate(viewer, rows);

        let profiles = vec![UserRow {
            id: 2,
            username: "bob".into(),
            full_name: "Bob B".into(),
            email: "bob@test.io".into(),
            password: "hash".into(),
            image: None,
            is_online: true,
            created_at: "2026-07-01 00:00:00".into(),
        }];

        let views = assemble_views(viewer, latest, &profiles);
        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert_eq!(view.id, 2);
        assert_eq!(view.last_message, "bob replies");
        assert!(!view.last_message_sender);
        assert!(view.seen);
        assert!(view.is_online);
    }

    #[test]
    fn counterpart_without_profile_is_skipped() {
        let viewer = 1;
        let rows = vec![row(1, 9, 1, "ghost", false, "2026-08-01 10:00:00")];
        let latest = aggregate(viewer, rows);
        let views = assemble_views(viewer, latest, &[]);
        assert!(views.is_empty());
    }
}
