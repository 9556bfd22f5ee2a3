use ndarray::ArrayView1;
use rand::{Rng, seq::SliceRandom};

use crate::error::ServiceError;

/// Shuffled train/test index split. The test part holds
/// `ceil(n * test_fraction)` rows.
pub fn train_test_split<R: Rng + ?Sized>(
    n: usize,
    test_fraction: f64,
    rng: &mut R,
) -> Result<(Vec<usize>, Vec<usize>), ServiceError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(ServiceError::BadRequest(format!(
            "test fraction must be in (0, 1), got {test_fraction}"
        )));
    }
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(ServiceError::BadRequest(format!(
            "cannot split {n} rows with test fraction {test_fraction}"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let train = indices.split_off(n_test);
    Ok((train, indices))
}

/// Stratified k-fold without shuffling, allocated like sklearn's
/// `StratifiedKFold`: the sorted labels are dealt round-robin to the folds,
/// which fixes how many rows of each class a fold gets. Each class's rows,
/// in order, are then cut into contiguous chunks of those sizes.
pub fn stratified_k_fold(
    labels: ArrayView1<f64>,
    k: usize,
) -> Result<Vec<(Vec<usize>, Vec<usize>)>, ServiceError> {
    if k < 2 {
        return Err(ServiceError::BadRequest(format!(
            "need at least 2 folds, got {k}"
        )));
    }
    if k > labels.len() {
        return Err(ServiceError::BadRequest(format!(
            "cannot make {k} folds from {} rows",
            labels.len()
        )));
    }

    let mut classes: Vec<f64> = labels.iter().copied().collect();
    classes.sort_by(f64::total_cmp);
    classes.dedup();

    let mut test_folds: Vec<Vec<usize>> = vec![Vec::new(); k];
    let mut offset = 0;
    for class in classes {
        let members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|&(_, &y)| y == class)
            .map(|(idx, _)| idx)
            .collect();
        let mut start = 0;
        for (fold, size) in class_fold_sizes(offset, members.len(), k).into_iter().enumerate() {
            test_folds[fold].extend_from_slice(&members[start..start + size]);
            start += size;
        }
        offset += members.len();
    }

    Ok(test_folds
        .into_iter()
        .map(|mut test| {
            test.sort_unstable();
            let train = (0..labels.len())
                .filter(|idx| test.binary_search(idx).is_err())
                .collect();
            (train, test)
        })
        .collect())
}

/// Rows of a class occupying sorted positions `offset..offset + count`
/// that land in each fold when positions are dealt out modulo `k`.
fn class_fold_sizes(offset: usize, count: usize, k: usize) -> Vec<usize> {
    let mut sizes = vec![0; k];
    for position in offset..offset + count {
        sizes[position % k] += 1;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use ndarray::Array1;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn split_sizes_and_coverage() {
        let mut rng = StdRng::seed_from_u64(7);
        let (train, test) = train_test_split(768, 0.25, &mut rng).unwrap();
        assert_eq!(test.len(), 192);
        assert_eq!(train.len(), 576);

        let mut all: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..768).collect::<Vec<_>>());

        let (_, test) = train_test_split(10, 0.25, &mut rng).unwrap();
        assert_eq!(test.len(), 3);
    }

    #[test]
    fn split_is_reproducible_with_a_seed() {
        let a = train_test_split(50, 0.25, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = train_test_split(50, 0.25, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn split_rejects_bad_fractions() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(train_test_split(10, 0.0, &mut rng).is_err());
        assert!(train_test_split(10, 1.0, &mut rng).is_err());
        assert!(train_test_split(1, 0.5, &mut rng).is_err());
    }

    #[test]
    fn folds_keep_class_balance() {
        let labels = Array1::from(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
        let folds = stratified_k_fold(labels.view(), 2).unwrap();
        assert_eq!(folds.len(), 2);
        for (train, test) in &folds {
            assert_eq!(train.len() + test.len(), 10);
            let positives = test.iter().filter(|&&i| labels[i] == 1.0).count();
            assert_eq!(positives, 2);
        }
        assert_eq!(folds[0].1, vec![0, 1, 2, 6, 7]);
    }

    #[test]
    fn folds_spread_remainders_first() {
        assert_eq!(class_fold_sizes(0, 10, 3), vec![4, 3, 3]);
        let labels = Array1::from(vec![0.0; 7]);
        let folds = stratified_k_fold(labels.view(), 3).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|(_, test)| test.len()).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
    }

    #[test]
    fn later_classes_continue_the_round_robin() {
        assert_eq!(class_fold_sizes(0, 5, 3), vec![2, 2, 1]);
        assert_eq!(class_fold_sizes(5, 5, 3), vec![2, 1, 2]);

        let labels = Array1::from(vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let folds = stratified_k_fold(labels.view(), 3).unwrap();
        let tests: Vec<Vec<usize>> = folds.into_iter().map(|(_, test)| test).collect();
        assert_eq!(tests, vec![vec![0, 1, 5, 6], vec![2, 3, 7], vec![4, 8, 9]]);
    }

    #[test]
    fn folds_validate_k() {
        let labels = Array1::from(vec![0.0, 1.0, 0.0]);
        assert!(stratified_k_fold(labels.view(), 1).is_err());
        assert!(stratified_k_fold(labels.view(), 4).is_err());
    }
}
