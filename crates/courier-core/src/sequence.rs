//! Strictly sequential async iteration.
//!
//! Each step is awaited to completion before the next one starts, so a
//! step's side effects are visible to every later step. The first hard
//! error stops the iteration.

use std::future::Future;

/// Threads an accumulator through `step` for each item in order.
///
/// ```rust,ignore
/// let notified = fold_sequential(triggers, HashSet::new(), |seen, trigger| {
///     matcher.process_rules(trigger, seen)
/// })
/// .await?;
/// ```
pub async fn fold_sequential<I, A, E, F, Fut>(items: I, init: A, mut step: F) -> Result<A, E>
where
    I: IntoIterator,
    F: FnMut(A, I::Item) -> Fut,
    Fut: Future<Output = Result<A, E>>,
{
    let mut acc = init;
    for item in items {
        acc = step(acc, item).await?;
    }
    Ok(acc)
}

/// Runs `op` for each item in order and hands every result to `collect`.
pub async fn for_each_sequential<I, R, E, Op, Fut, C>(
    items: I,
    mut op: Op,
    mut collect: C,
) -> Result<(), E>
where
    I: IntoIterator,
    Op: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    C: FnMut(R),
{
    for item in items {
        collect(op(item).await?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[tokio::test]
    async fn test_fold_threads_accumulator_in_order() {
        let result: Result<Vec<u32>, ()> = fold_sequential(1..=3, Vec::new(), |mut acc, n| async move {
            acc.push(n * 10);
            Ok(acc)
        })
        .await;
        assert_eq!(result.unwrap(), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_fold_short_circuits() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let result = fold_sequential(1..=5, 0u32, |acc, n| {
            let seen = seen.clone();
            async move {
                seen.lock().push(n);
                if n == 3 { Err("boom") } else { Ok(acc + n) }
            }
        })
        .await;

        assert_eq!(result, Err("boom"));
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_for_each_collects_results() {
        let mut total = 0;
        let result: Result<(), ()> =
            for_each_sequential(["a", "bb", "ccc"], |s| async move { Ok(s.len()) }, |len| {
                total += len
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(total, 6);
    }
}
