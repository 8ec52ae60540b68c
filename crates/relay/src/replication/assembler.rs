use crate::config::CategorySizes;
use crate::registry::{BodyId, PlayerId};

use super::ClientReplication;

/// Replicated item families, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Input,
    Avatar,
    Body,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Input, Category::Avatar, Category::Body];
}

impl CategorySizes {
    pub fn of(&self, category: Category) -> usize {
        match category {
            Category::Input => self.input,
            Category::Avatar => self.avatar,
            Category::Body => self.body,
        }
    }
}

/// Head of one category's sorted set, as seen by one selection round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub category: Category,
    pub index: u32,
    pub priority: f32,
    pub size: usize,
}

/// Items chosen for one state update, each list in pop order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackPlan {
    pub inputs: Vec<PlayerId>,
    pub avatars: Vec<PlayerId>,
    pub bodies: Vec<BodyId>,
    pub bytes_used: usize,
}

impl PackPlan {
    pub fn len(&self) -> usize {
        self.inputs.len() + self.avatars.len() + self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, candidate: &Candidate) {
        match candidate.category {
            Category::Input => self.inputs.push(PlayerId(candidate.index as u16)),
            Category::Avatar => self.avatars.push(PlayerId(candidate.index as u16)),
            Category::Body => self.bodies.push(BodyId(candidate.index)),
        }
        self.bytes_used += candidate.size;
    }
}

/// Greedily fills `budget` bytes from the client's three sets.
///
/// Every round looks at the head of each set, drops the heads that no longer
/// fit, and pops the highest remaining priority. Equal priorities go to the
/// earlier [`Category`]. Popping resets the item's priority to zero; items
/// left behind keep theirs and continue to age.
pub fn assemble(
    client: &mut ClientReplication,
    sizes: &CategorySizes,
    budget: usize,
) -> PackPlan {
    client.sort();

    let smallest = sizes.smallest().max(1);
    let mut remaining = budget;
    let mut plan = PackPlan::default();

    while remaining >= smallest {
        let Some(winner) = next_candidate(client, sizes, remaining) else {
            break;
        };

        let popped = client.set_mut(winner.category).pop();
        debug_assert_eq!(popped, Some(winner.index));
        remaining -= winner.size;
        plan.push(&winner);
    }

    plan
}

fn next_candidate(
    client: &ClientReplication,
    sizes: &CategorySizes,
    remaining: usize,
) -> Option<Candidate> {
    Category::ALL
        .into_iter()
        .filter_map(|category| {
            let size = sizes.of(category);
            if size > remaining {
                return None;
            }
            let head = client.set(category).peek_next()?;
            Some(Candidate {
                category,
                index: head.index,
                priority: head.priority,
                size,
            })
        })
        .fold(None, |best: Option<Candidate>, candidate| match best {
            Some(best) if best.priority >= candidate.priority => Some(best),
            _ => Some(candidate),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgingWeights;
    use crate::net::ConnectionId;
    use crate::registry::PlayerKey;
    use proptest::prelude::*;

    const SMALL_SIZES: CategorySizes = CategorySizes {
        input: 17,
        avatar: 45,
        body: 40,
    };

    fn client_with(peers: u16, bodies: u32) -> ClientReplication {
        let mut client = ClientReplication::new(ConnectionId(0), PlayerKey::new(PlayerId(0), 0));
        client.ensure_capacity(peers as usize + 1, bodies as usize);
        for peer in 1..=peers {
            client.seed_peer(PlayerId(peer)).unwrap();
        }
        for body in 0..bodies {
            client.seed_body(BodyId(body)).unwrap();
        }
        client
    }

    fn unconsumed_fit(
        client: &ClientReplication,
        sizes: &CategorySizes,
        remaining: usize,
    ) -> bool {
        Category::ALL.into_iter().any(|category| {
            client.set(category).remaining() > 0 && sizes.of(category) <= remaining
        })
    }

    #[test]
    fn empty_sets_produce_empty_plan() {
        let mut client = client_with(0, 0);
        let plan = assemble(&mut client, &CategorySizes::default(), 1189);
        assert!(plan.is_empty());
        assert_eq!(plan.bytes_used, 0);
    }

    #[test]
    fn three_clients_fifty_bodies() {
        // Each of three clients sees two peers and every body.
        for _ in 0..3 {
            let mut client = client_with(2, 50);
            client.age(&AgingWeights::default());

            let plan = assemble(&mut client, &SMALL_SIZES, 1200);
            assert!(plan.bytes_used <= 1200);
            assert_eq!(plan.inputs.len(), 2);
            assert_eq!(plan.avatars.len(), 2);
            assert_eq!(plan.bodies.len(), 26);

            let remaining = 1200 - plan.bytes_used;
            assert!(remaining < SMALL_SIZES.body);
            assert!(!unconsumed_fit(&client, &SMALL_SIZES, remaining));
        }
    }

    #[test]
    fn stops_below_smallest_size() {
        let mut client = client_with(60, 0);
        client.age(&AgingWeights::default());

        let plan = assemble(&mut client, &SMALL_SIZES, 1200);
        // 60 inputs take 1020 bytes and four avatars the remaining 180.
        assert_eq!(plan.inputs.len(), 60);
        assert_eq!(plan.avatars.len(), 4);
        assert!(1200 - plan.bytes_used < SMALL_SIZES.input);
    }

    #[test]
    fn unaffordable_head_is_skipped_for_lower_priority() {
        let mut client = client_with(1, 1);
        client.set_mut(Category::Avatar).bump(1, 10.0).unwrap();
        client.set_mut(Category::Body).bump(0, 1.0).unwrap();

        let sizes = CategorySizes {
            input: 30,
            avatar: 100,
            body: 50,
        };
        let plan = assemble(&mut client, &sizes, 60);
        assert!(plan.avatars.is_empty());
        assert_eq!(plan.bodies, vec![BodyId(0)]);
        assert_eq!(client.set(Category::Avatar).priority(1), Some(10.0));
    }

    #[test]
    fn ties_resolve_in_category_order() {
        let mut client = client_with(1, 1);
        let sizes = CategorySizes {
            input: 10,
            avatar: 10,
            body: 10,
        };

        let plan = assemble(&mut client, &sizes, 10);
        assert_eq!(plan.inputs, vec![PlayerId(1)]);
        assert!(plan.bodies.is_empty());
    }

    #[test]
    fn skipped_items_win_the_next_tick() {
        let mut client = client_with(0, 4);
        let sizes = CategorySizes::default();
        let weights = AgingWeights::default();

        client.age(&weights);
        let first = assemble(&mut client, &sizes, 2 * sizes.body);
        assert_eq!(first.bodies.len(), 2);

        client.age(&weights);
        let second = assemble(&mut client, &sizes, 2 * sizes.body);
        for body in &second.bodies {
            assert!(!first.bodies.contains(body));
        }
    }

    #[test]
    fn starved_item_keeps_rising_until_picked() {
        let mut client = client_with(0, 4);
        let sizes = CategorySizes::default();
        let weights = AgingWeights::default();

        let mut popped = Vec::new();
        let mut history = Vec::new();
        for _ in 0..3 {
            client.age(&weights);
            let plan = assemble(&mut client, &sizes, sizes.body);
            assert_eq!(plan.bodies.len(), 1);
            popped.push(plan.bodies[0]);
            history.push(client.clone());
        }

        let starved = (0..4)
            .map(BodyId)
            .find(|body| !popped.contains(body))
            .unwrap();
        let rising: Vec<f32> = history
            .iter()
            .map(|c| c.set(Category::Body).priority(starved.index()).unwrap())
            .collect();
        assert_eq!(rising, vec![1.0, 2.0, 3.0]);
        for pair in rising.windows(2) {
            assert!(pair[1] > pair[0]);
        }

        client.age(&weights);
        let bodies = client.set(Category::Body);
        for body in &popped {
            assert!(bodies.priority(starved.index()) > bodies.priority(body.index()));
        }
        let plan = assemble(&mut client, &sizes, sizes.body);
        assert_eq!(plan.bodies, vec![starved]);
    }

    fn populated_client() -> impl Strategy<Value = ClientReplication> {
        (
            prop::collection::vec(0.0f32..100.0, 0..40),
            prop::collection::vec(0.0f32..100.0, 0..40),
            prop::collection::vec(0.0f32..100.0, 0..120),
        )
            .prop_map(|(inputs, avatars, bodies)| {
                let peers = inputs.len().max(avatars.len()) as u16;
                let mut client = client_with(peers, bodies.len() as u32);
                for (i, p) in inputs.iter().enumerate() {
                    client.set_mut(Category::Input).bump(i as u32 + 1, *p).unwrap();
                }
                for (i, p) in avatars.iter().enumerate() {
                    client.set_mut(Category::Avatar).bump(i as u32 + 1, *p).unwrap();
                }
                for (i, p) in bodies.iter().enumerate() {
                    client.set_mut(Category::Body).bump(i as u32, *p).unwrap();
                }
                client
            })
    }

    fn sizes() -> impl Strategy<Value = CategorySizes> {
        (1usize..200, 1usize..200, 1usize..200).prop_map(|(input, avatar, body)| {
            CategorySizes {
                input,
                avatar,
                body,
            }
        })
    }

    proptest! {
        #[test]
        fn prop_plan_never_exceeds_budget(
            client in populated_client(),
            sizes in sizes(),
            budget in 0usize..5000,
        ) {
            let mut client = client;
            let plan = assemble(&mut client, &sizes, budget);
            prop_assert!(plan.bytes_used <= budget);

            let expected = plan.inputs.len() * sizes.input
                + plan.avatars.len() * sizes.avatar
                + plan.bodies.len() * sizes.body;
            prop_assert_eq!(plan.bytes_used, expected);
            prop_assert!(!unconsumed_fit(&client, &sizes, budget - plan.bytes_used));
        }

        #[test]
        fn prop_categories_are_descending_and_reset(
            client in populated_client(),
            sizes in sizes(),
            budget in 0usize..5000,
        ) {
            let before = client.clone();
            let mut client = client;
            let plan = assemble(&mut client, &sizes, budget);

            let check = |category: Category, picked: Vec<u32>| -> Result<(), TestCaseError> {
                let original: Vec<f32> = picked
                    .iter()
                    .map(|&i| before.set(category).priority(i).unwrap_or(f32::NAN))
                    .collect();
                for pair in original.windows(2) {
                    prop_assert!(pair[0] >= pair[1]);
                }
                for &i in &picked {
                    prop_assert_eq!(client.set(category).priority(i), Some(0.0));
                }
                Ok(())
            };

            check(Category::Input, plan.inputs.iter().map(|p| p.index()).collect())?;
            check(Category::Avatar, plan.avatars.iter().map(|p| p.index()).collect())?;
            check(Category::Body, plan.bodies.iter().map(|b| b.index()).collect())?;
        }
    }
}
