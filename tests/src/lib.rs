use chrono::{Duration, Utc};
use plaudit_api::{Comment, CommentId, ContentId, RelationKey, UserId, UserSummary, Uuid};
use plaudit_mock_server::Dump;
use rand::{seq::SliceRandom, Rng};

pub const NUM_USERS: usize = 5;
pub const NUM_CONTENTS: usize = 3;
pub const NUM_ROOTS: usize = 60;
pub const NUM_REPLIES: usize = 150;
pub const NUM_LIKES: usize = 10;
pub const NUM_FOLLOWS: usize = 10;

const COMMENT_WORD_COUNT: usize = 25;

fn gen_comment_text(rng: &mut impl Rng) -> String {
    lipsum::lipsum_words(rng.gen_range(1..COMMENT_WORD_COUNT))
}

/// Generates a random but consistent server state
///
/// Replies always point at a root of the same content, and the comments are
/// listed in creation order.
pub fn generate_dump(rng: &mut impl Rng) -> Dump {
    let users = (0..NUM_USERS)
        .map(|i| UserSummary {
            id: UserId(Uuid::new_v4()),
            display_name: format!("user{i}"),
            avatar_url: rng
                .gen_bool(0.5)
                .then(|| format!("https://avatars.invalid/{i}.png")),
        })
        .collect::<Vec<_>>();
    let contents = (0..NUM_CONTENTS)
        .map(|_| ContentId(Uuid::new_v4()))
        .collect::<Vec<_>>();

    let mut date = Utc::now() - Duration::days(30);
    let mut comments = Vec::with_capacity(NUM_ROOTS + NUM_REPLIES);
    for _ in 0..NUM_ROOTS {
        date = date + Duration::seconds(rng.gen_range(1..3600));
        comments.push(Comment {
            id: CommentId(Uuid::new_v4()),
            content_id: contents[rng.gen_range(0..contents.len())],
            parent_id: None,
            author: users[rng.gen_range(0..users.len())].clone(),
            text: gen_comment_text(rng),
            created_at: date,
            replies_count: 0,
        });
    }
    for _ in 0..NUM_REPLIES {
        let root = comments[rng.gen_range(0..NUM_ROOTS)].clone();
        date = date + Duration::seconds(rng.gen_range(1..3600));
        comments.push(Comment {
            id: CommentId(Uuid::new_v4()),
            content_id: root.content_id,
            parent_id: Some(root.id),
            author: users[rng.gen_range(0..users.len())].clone(),
            text: gen_comment_text(rng),
            created_at: date,
            replies_count: 0,
        });
    }

    let mut relations = users
        .iter()
        .flat_map(|u| contents.iter().map(|c| RelationKey::like(u.id, *c)))
        .collect::<Vec<_>>();
    relations.shuffle(rng);
    relations.truncate(NUM_LIKES);
    for _ in 0..NUM_FOLLOWS {
        let pair = users.choose_multiple(rng, 2).collect::<Vec<_>>();
        let key = RelationKey::follow(pair[0].id, pair[1].id);
        if !relations.contains(&key) {
            relations.push(key);
        }
    }

    Dump {
        users,
        comments,
        relations,
    }
}
