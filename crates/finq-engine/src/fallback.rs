//! "First success wins" over an ordered list of candidates

use std::future::Future;

/// Try candidates in order and return the first success
///
/// On success yields the winning candidate's index and value. When every
/// candidate fails, yields all errors in candidate order. Candidates after
/// the winner are never attempted.
pub async fn first_success<I, F, Fut, T, E>(candidates: I, mut attempt: F) -> Result<(usize, T), Vec<E>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut errors = Vec::new();
    for (index, candidate) in candidates.into_iter().enumerate() {
        match attempt(candidate).await {
            Ok(value) => return Ok((index, value)),
            Err(e) => errors.push(e),
        }
    }
    Err(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_third_candidate_wins() {
        let tried = RefCell::new(Vec::new());
        let result = first_success(["a", "b", "c", "d"], |name| {
            tried.borrow_mut().push(name);
            async move {
                if name == "c" {
                    Ok(format!("value from {name}"))
                } else {
                    Err(format!("{name} failed"))
                }
            }
        })
        .await;

        assert_eq!(result, Ok((2, "value from c".to_string())));
        assert_eq!(*tried.borrow(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_all_fail() {
        let result: Result<(usize, ()), _> =
            first_success(1..=3, |n| async move { Err(n * 10) }).await;
        assert_eq!(result, Err(vec![10, 20, 30]));
    }

    #[tokio::test]
    async fn test_empty() {
        let result: Result<(usize, ()), Vec<()>> =
            first_success(Vec::<u8>::new(), |_| async { Ok(()) }).await;
        assert_eq!(result, Err(vec![]));
    }
}
