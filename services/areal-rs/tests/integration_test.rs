use areal_core::*;

/// Family A packed into a few kilometres near the equator, family B spread
/// across the Pacific.
fn two_family_world() -> (Vec<String>, Vec<GeoPoint>, Vec<String>) {
    let mut ids = Vec::new();
    let mut points = Vec::new();
    let mut families = Vec::new();
    for i in 0..10 {
        ids.push(format!("a{i}"));
        points.push(GeoPoint::new(0.0, i as f64 * 0.05));
        families.push("A".to_string());
    }
    for i in 0..10 {
        ids.push(format!("b{i}"));
        points.push(GeoPoint::new(-30.0 + i as f64 * 6.0, 150.0 - i as f64 * 3.0));
        families.push("B".to_string());
    }
    (ids, points, families)
}

/// Forty languages on a line, four interleaved families
fn interleaved_world() -> (DistanceMatrix, Vec<String>) {
    let ids: Vec<String> = (0..40).map(|i| format!("l{i:02}")).collect();
    let points: Vec<GeoPoint> = (0..40)
        .map(|i| GeoPoint::new(5.0, i as f64 * 0.5))
        .collect();
    let families = (0..40).map(|i| format!("f{}", i % 4)).collect();
    (DistanceMatrix::build(ids, &points).unwrap(), families)
}

#[test]
fn test_feature_confined_to_compact_family_is_enriched() {
    let (ids, points, families) = two_family_world();
    let matrix = DistanceMatrix::build(ids, &points).unwrap();

    for i in 0..10 {
        for j in 0..10 {
            assert!(matrix.get(i, j) < 100_000.0);
        }
    }

    let index = NeighbourIndex::build(&matrix, 10, NeighbourMode::Unrestricted, &families).unwrap();
    let kernel = EnrichmentKernel::new(&index, &families).unwrap();
    let presence: Vec<bool> = (0..20).map(|i| i < 10).collect();

    let outcome = run_permutation_test(
        &kernel,
        &presence,
        &PermutationConfig {
            iterations: 1000,
            seed: 1234,
        },
    )
    .unwrap()
    .unwrap();

    // Nine of each A language's ten nearest neighbours are in A
    assert!(outcome.observed >= 0.9 - 1e-12);
    assert!(outcome.empirical_quantile > 0.95);
    assert_eq!(outcome.null.len(), 1000);
}

#[test]
fn test_geographic_cluster_across_families_is_detected() {
    let (matrix, families) = interleaved_world();
    let index = NeighbourIndex::build(&matrix, 4, NeighbourMode::Unrestricted, &families).unwrap();
    let kernel = EnrichmentKernel::new(&index, &families).unwrap();
    let presence: Vec<bool> = (0..40).map(|i| i < 20).collect();

    let outcome = run_permutation_test(
        &kernel,
        &presence,
        &PermutationConfig {
            iterations: 500,
            seed: 7,
        },
    )
    .unwrap()
    .unwrap();

    assert!(outcome.observed > 0.8);
    assert!(outcome.empirical_quantile > 0.95);
    assert!(outcome.logit_quantile > 2.0);
}

#[test]
fn test_distance_matrix_symmetric_with_zero_diagonal() {
    let (ids, points, _) = two_family_world();
    let matrix = DistanceMatrix::build(ids, &points).unwrap();

    for i in 0..matrix.len() {
        assert_eq!(matrix.get(i, i), 0.0);
        for j in 0..matrix.len() {
            assert_eq!(matrix.get(i, j), matrix.get(j, i));
            assert!(matrix.get(i, j) >= 0.0);
        }
    }
}

#[test]
fn test_cross_family_neighbours_exclude_own_family() {
    let (matrix, families) = interleaved_world();
    let index = NeighbourIndex::build(&matrix, 5, NeighbourMode::CrossFamily, &families).unwrap();

    assert!(index.insufficient_neighbours().is_empty());
    for i in 0..index.len() {
        let neighbours = index.neighbours(i);
        assert_eq!(neighbours.len(), 5);
        assert!(!neighbours.contains(&i));
        assert!(neighbours.iter().all(|&j| families[j] != families[i]));
    }
}

#[test]
fn test_cross_family_shortfall_is_padded_and_flagged() {
    let (ids, points, families) = two_family_world();
    let matrix = DistanceMatrix::build(ids, &points).unwrap();

    // Only ten languages outside each family; k = 12 can not be met
    let index = NeighbourIndex::build(&matrix, 12, NeighbourMode::CrossFamily, &families).unwrap();
    assert_eq!(index.insufficient_neighbours().len(), 20);
    for i in 0..index.len() {
        let neighbours = index.neighbours(i);
        assert_eq!(neighbours.len(), 12);
        let foreign = neighbours
            .iter()
            .filter(|&&j| families[j] != families[i])
            .count();
        assert_eq!(foreign, 10);
        // Out-of-family candidates rank ahead of the padding
        assert!(neighbours[..10].iter().all(|&j| families[j] != families[i]));
    }
}

#[test]
fn test_permutation_preserves_family_counts() {
    let (matrix, families) = interleaved_world();
    let index = NeighbourIndex::build(&matrix, 4, NeighbourMode::Unrestricted, &families).unwrap();
    let kernel = EnrichmentKernel::new(&index, &families).unwrap();
    let presence: Vec<bool> = (0..40).map(|i| (i * 3) % 7 < 3).collect();
    let permuter = StratifiedPermuter::new(kernel.blocks(), kernel.block_count(), &presence);

    let counts = |values: &[bool]| {
        let mut counts = vec![0usize; kernel.block_count()];
        for (i, _) in values.iter().enumerate().filter(|(_, &v)| v) {
            counts[kernel.blocks()[i]] += 1;
        }
        counts
    };

    let expected = counts(&presence);
    for iteration in 0..100 {
        let mut rng = permutation::iteration_rng(42, iteration);
        assert_eq!(counts(&permuter.permute(&presence, &mut rng)), expected);
    }
}

#[test]
fn test_same_seed_gives_identical_null() {
    let (matrix, families) = interleaved_world();
    let index = NeighbourIndex::build(&matrix, 4, NeighbourMode::CrossFamily, &families).unwrap();
    let kernel = EnrichmentKernel::new(&index, &families).unwrap();
    let presence: Vec<bool> = (0..40).map(|i| i % 5 < 2).collect();
    let config = PermutationConfig {
        iterations: 300,
        seed: 2024,
    };

    let first = run_permutation_test(&kernel, &presence, &config).unwrap().unwrap();
    let second = run_permutation_test(&kernel, &presence, &config).unwrap().unwrap();

    assert!(first.null.bit_identical(&second.null));
    assert_eq!(first.observed.to_bits(), second.observed.to_bits());
    assert_eq!(first.empirical_quantile, second.empirical_quantile);
}

#[test]
fn test_quantile_never_decreases_with_observed() {
    let null: Vec<f64> = (0..250).map(|i| ((i * 37) % 250) as f64 / 250.0).collect();
    let mut previous = 0.0;
    for step in 0..=60 {
        let q = empirical_quantile(step as f64 / 50.0 - 0.1, &null).unwrap();
        assert!(q >= previous);
        previous = q;
    }
    assert_eq!(previous, 1.0);
}

#[test]
fn test_batch_from_inventory_rows() {
    let mut rows = Vec::new();
    for i in 0..24 {
        let mut phonemes = vec!["a", "i"];
        if i < 12 {
            phonemes.push("y");
        }
        if i % 6 == 0 {
            phonemes.push("øː");
        }
        for phoneme in phonemes {
            rows.push(InventoryRow {
                sample_id: format!("s{i:02}"),
                language_code: format!("l{i:02}"),
                family_id: Some(format!("fam{}", i % 3)),
                language_name: format!("Language {i}"),
                latitude: Some(10.0),
                longitude: Some(i as f64),
                phoneme: phoneme.to_string(),
                level: Some("language".to_string()),
            });
        }
    }
    let sample = Sample::from_rows(rows, &GeographyTable::default()).unwrap();
    assert_eq!(sample.len(), 24);

    let runner = BatchRunner::new(AnalysisConfig {
        k: 3,
        iterations: 200,
        min_languages: 5,
        variants: vec![
            VariantSpec::new("full", NeighbourMode::Unrestricted),
            VariantSpec::new("cross_family", NeighbourMode::CrossFamily),
        ],
        ..AnalysisConfig::default()
    })
    .unwrap();

    let features: Vec<String> = runner
        .features(&sample)
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert!(features.contains(&"y".to_string()));
    // Length marks are stripped before counting
    assert!(!features.iter().any(|f| f.contains('ː')));

    let report = runner.run(&sample).unwrap();
    let y = report.get("full", "y").unwrap();
    assert_eq!(y.status, TestStatus::Tested);
    assert_eq!(y.languages_present, 12);
    assert!(y.empirical_quantile.unwrap() > 0.9);

    // Ranked: tested rows first, descending logit
    let logits: Vec<f64> = report
        .results
        .iter()
        .take_while(|r| r.is_tested())
        .filter_map(|r| r.logit_quantile)
        .collect();
    assert!(logits.windows(2).all(|w| w[0] >= w[1]));
}
