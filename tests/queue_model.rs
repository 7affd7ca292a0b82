//! Randomized check of the job queue against a reference model: the
//! queue stays within capacity, never duplicates an ID, spills exactly
//! the worst entries, and drains in sort order.

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use pglocker::{JobDescriptor, JobQueue, Pop};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CAPACITY: usize = 5;

fn descriptor(rng: &mut StdRng, job_id: i64) -> JobDescriptor {
    JobDescriptor {
        priority: rng.gen_range(0..20),
        run_at: Utc.timestamp_opt(1_700_000_000 + rng.gen_range(0..1000), 0).unwrap(),
        job_id,
    }
}

#[tokio::test]
async fn random_pushes_match_the_reference_model() {
    let mut rng = StdRng::seed_from_u64(0x10c4e2);

    for _round in 0..50 {
        let queue = JobQueue::new(CAPACITY);
        let mut model: BTreeSet<JobDescriptor> = BTreeSet::new();
        let mut next_id = 0_i64;

        for _push in 0..10 {
            let batch: Vec<JobDescriptor> = (0..rng.gen_range(0..4))
                .map(|_| {
                    next_id += 1;
                    descriptor(&mut rng, next_id)
                })
                .collect();

            let mut expected_spill: Vec<JobDescriptor> = Vec::new();
            model.extend(batch.iter().copied());
            while model.len() > CAPACITY {
                let worst = *model.iter().next_back().unwrap();
                model.remove(&worst);
                expected_spill.push(worst);
            }

            let spilled = queue.push(batch);
            assert_eq!(spilled, expected_spill);
            assert!(queue.size() <= CAPACITY);
            assert_eq!(queue.jobs(), model.iter().copied().collect::<Vec<_>>());
            assert_eq!(
                queue.lowest_priority(),
                model.iter().next_back().map(|d| d.priority)
            );

            let ids = queue.job_ids();
            let unique: BTreeSet<i64> = ids.iter().copied().collect();
            assert_eq!(unique.len(), ids.len(), "duplicate ID in queue");
        }

        // Drain and verify sort order end to end.
        let mut drained = Vec::new();
        for _ in 0..queue.size() {
            match queue.pop(None).await {
                Pop::Job(job) => drained.push(job),
                Pop::Shutdown => panic!("queue was not stopped"),
            }
        }
        assert_eq!(drained, model.into_iter().collect::<Vec<_>>());
        assert_eq!(queue.size(), 0);
    }
}
