use deident_core::{
    AnonymizationConfig, Anonymity, Anonymizer, AnonymizerError, Data, HandleError, HandleState,
    Hierarchy, LocalRecodingConfig, PrivacyModel, SearchAlgorithm, StopReason, Transformation,
};

fn age() -> Hierarchy {
    Hierarchy::from_rows(&[
        &["34", "<50", "*"],
        &["45", "<50", "*"],
        &["66", ">=50", "*"],
        &["70", ">=50", "*"],
    ])
}

fn gender() -> Hierarchy {
    Hierarchy::from_rows(&[&["male", "*"], &["female", "*"]])
}

fn zipcode() -> Hierarchy {
    Hierarchy::from_rows(&[
        &["81667", "8166*", "816**", "81***", "8****", "*****"],
        &["81675", "8167*", "816**", "81***", "8****", "*****"],
        &["81925", "8192*", "819**", "81***", "8****", "*****"],
        &["81931", "8193*", "819**", "81***", "8****", "*****"],
    ])
}

fn raw() -> Data {
    Data::from_rows(&[
        &["age", "gender", "zipcode"],
        &["34", "male", "81667"],
        &["45", "female", "81675"],
        &["66", "male", "81925"],
        &["70", "female", "81931"],
        &["34", "female", "81931"],
        &["70", "male", "81931"],
        &["45", "male", "81931"],
    ])
    .expect("example data")
}

fn example() -> Data {
    let mut data = raw();
    data.definition_mut()
        .set_quasi_identifier("age", age())
        .set_quasi_identifier("gender", gender())
        .set_quasi_identifier("zipcode", zipcode());
    data
}

fn k(k: u32) -> AnonymizationConfig {
    AnonymizationConfig::with_model(PrivacyModel::KAnonymity { k })
}

fn table(data: &Data, config: &AnonymizationConfig) -> Vec<Vec<String>> {
    let result = Anonymizer::new().anonymize(data, config).expect("anonymize");
    let mut output = result.output().expect("output");
    let rows = (0..output.num_rows().expect("rows"))
        .map(|r| {
            output
                .row(r)
                .expect("row")
                .into_iter()
                .map(str::to_string)
                .collect()
        })
        .collect();
    output.release().expect("release");
    rows
}

fn expected(rows: &[[&str; 3]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| r.iter().map(|v| (*v).to_string()).collect())
        .collect()
}

#[test]
fn k2_reproduces_the_reference_table() {
    let data = example();
    let result = Anonymizer::new().anonymize(&data, &k(2)).expect("anonymize");
    assert_eq!(
        result.global_optimum(),
        Some(&Transformation::new(vec![1, 1, 2]))
    );
    drop(result);

    assert_eq!(
        table(&data, &k(2)),
        expected(&[
            ["<50", "*", "816**"],
            ["<50", "*", "816**"],
            [">=50", "*", "819**"],
            [">=50", "*", "819**"],
            ["<50", "*", "819**"],
            [">=50", "*", "819**"],
            ["<50", "*", "819**"],
        ])
    );
}

#[test]
fn single_level_hierarchy_has_no_solution() {
    let mut data = raw();
    data.definition_mut()
        .set_quasi_identifier("age", age())
        .set_quasi_identifier("gender", gender())
        .set_quasi_identifier(
            "zipcode",
            Hierarchy::from_rows(&[&["81667"], &["81675"], &["81925"], &["81931"]]),
        );

    let result = Anonymizer::new().anonymize(&data, &k(2)).expect("anonymize");
    assert!(result.global_optimum().is_none());
    assert_eq!(result.solution_space().checked_count(), 1);
    assert!(matches!(
        result.output(),
        Err(AnonymizerError::Handle(HandleError::NoSolution))
    ));

    // top is not anonymous: everything below is inferred
    let stats = result.statistics();
    assert_eq!(stats.not_anonymous, stats.size);
    assert!(!data.is_locked());
}

#[test]
fn distinct_l_diversity_on_age() {
    let mut data = raw();
    data.definition_mut()
        .set_sensitive("age")
        .set_quasi_identifier("gender", gender())
        .set_quasi_identifier("zipcode", zipcode());
    let config = AnonymizationConfig::with_model(PrivacyModel::DistinctLDiversity {
        attribute: "age".into(),
        l: 2,
    });

    assert_eq!(
        table(&data, &config),
        expected(&[
            ["*", "male", "81***"],
            ["*", "female", "81***"],
            ["*", "male", "81***"],
            ["*", "female", "81***"],
            ["*", "female", "81***"],
            ["*", "male", "81***"],
            ["*", "male", "81***"],
        ])
    );
}

#[test]
fn repeated_runs_on_one_source_are_reproducible() {
    let data = example();
    let anonymizer = Anonymizer::new();

    let mut outputs = Vec::new();
    for k_value in [2, 3, 2] {
        let result = anonymizer.anonymize(&data, &k(k_value)).expect("anonymize");
        let mut output = result.output().expect("output");
        assert_eq!(output.state(), HandleState::ForkedLocked);
        let rows: Vec<Vec<String>> = (0..output.num_rows().expect("rows"))
            .map(|r| {
                output
                    .row(r)
                    .expect("row")
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .collect();
        output.release().expect("release");
        assert_eq!(output.state(), HandleState::Orphaned);
        outputs.push(rows);
    }

    assert_eq!(outputs[0], outputs[2]);
    assert_ne!(outputs[0], outputs[1]);
}

#[test]
fn anonymous_nodes_form_an_upper_set() {
    let data = example();
    let result = Anonymizer::new().anonymize(&data, &k(2)).expect("anonymize");
    let lattice = result.solution_space().lattice().clone();

    for index in 0..lattice.size() {
        let t = lattice.transformation(index);
        let node = result.node(&t).expect("node");
        if node.anonymity == Anonymity::Anonymous {
            for successor in lattice.successors(&t) {
                let above = result.node(&successor).expect("node");
                assert_eq!(above.anonymity, Anonymity::Anonymous, "{successor}");
            }
        }
    }

    let stats = result.statistics();
    assert!(stats.complete);
    assert_eq!(stats.probably_anonymous + stats.probably_not_anonymous, 0);
    assert_eq!(
        stats.anonymous + stats.not_anonymous + stats.unknown,
        stats.size
    );
}

#[test]
fn checked_nodes_carry_a_point_loss() {
    let data = example();
    let result = Anonymizer::new().anonymize(&data, &k(2)).expect("anonymize");
    let view = result.lattice();
    assert!(!view.truncated);
    assert_eq!(
        view.levels.iter().map(Vec::len).sum::<usize>() as u64,
        view.size
    );

    for node in view.levels.iter().flatten() {
        if node.checked {
            let range = node.loss.expect("checked loss");
            assert_eq!(range.min, range.max);
        }
        if let Some(range) = node.loss {
            assert!(range.min <= range.max);
        }
    }
    let optimum_loss = result.optimum_loss().expect("loss");
    for node in view.levels.iter().flatten() {
        if node.checked && node.anonymity == Anonymity::Anonymous {
            assert!(node.loss.expect("loss").min >= optimum_loss);
        }
    }
}

#[test]
fn suppression_limit_is_respected() {
    let data = example();
    let config = k(3).with_suppression_limit(0.3);
    let result = Anonymizer::new().anonymize(&data, &config).expect("anonymize");
    let mut output = result.output().expect("output");
    // floor(0.3 · 7) = 2
    assert!(output.suppressed_count().expect("count") <= 2);
    output.release().expect("release");
}

#[test]
fn heuristics_are_reproducible() {
    let data = example();
    for algorithm in [SearchAlgorithm::Lightning, SearchAlgorithm::Genetic] {
        let mut config = k(2);
        config.search.algorithm = algorithm;
        config.search.heuristic.step_limit = 10;

        let a = Anonymizer::new().anonymize(&data, &config).expect("anonymize");
        let b = Anonymizer::new().anonymize(&data, &config).expect("anonymize");
        assert_eq!(a.algorithm(), algorithm);
        assert!(!a.is_optimal());
        assert_eq!(
            a.solution_space().checked_nodes(),
            b.solution_space().checked_nodes()
        );
        assert_eq!(a.global_optimum(), b.global_optimum());
    }
}

#[test]
fn warm_cache_does_not_change_the_result() {
    let data = example();
    let warm = Anonymizer::new();
    warm.anonymize(&data, &k(2)).expect("first run");
    let again = warm.anonymize(&data, &k(2)).expect("second run");
    let cold = Anonymizer::new().anonymize(&data, &k(2)).expect("cold run");

    assert_eq!(again.global_optimum(), cold.global_optimum());
    assert_eq!(again.optimum_loss(), cold.optimum_loss());
    assert_eq!(
        again.solution_space().checked_nodes(),
        cold.solution_space().checked_nodes()
    );
}

#[test]
fn output_for_rejects_nodes_outside_the_lattice() {
    let data = example();
    let result = Anonymizer::new().anonymize(&data, &k(2)).expect("anonymize");
    assert!(matches!(
        result.output_for(&Transformation::new(vec![3, 0, 0])),
        Err(AnonymizerError::Handle(HandleError::UnknownTransformation))
    ));
    assert!(result.node(&Transformation::new(vec![0, 2, 0])).is_none());
}

#[test]
fn local_recoding_through_the_public_api() {
    let mut data = Data::from_rows(&[
        &["zip", "age"],
        &["1000", "20"],
        &["1000", "20"],
        &["1000", "20"],
        &["2000", "30"],
        &["2000", "30"],
        &["2000", "30"],
        &["1001", "21"],
        &["2001", "31"],
    ])
    .expect("data");
    data.definition_mut()
        .set_quasi_identifier(
            "zip",
            Hierarchy::from_rows(&[
                &["1000", "1***", "*"],
                &["1001", "1***", "*"],
                &["2000", "2***", "*"],
                &["2001", "2***", "*"],
            ]),
        )
        .set_quasi_identifier(
            "age",
            Hierarchy::from_rows(&[
                &["20", "20-29", "*"],
                &["21", "20-29", "*"],
                &["30", "30-39", "*"],
                &["31", "30-39", "*"],
            ]),
        );

    let config = k(2).with_suppression_limit(0.25);
    let result = Anonymizer::new().anonymize(&data, &config).expect("anonymize");
    let mut output = result
        .output_for(&Transformation::new(vec![0, 0]))
        .expect("output");
    assert_eq!(output.suppressed_count().expect("count"), 2);

    let report = result
        .optimize(&mut output, &LocalRecodingConfig::default())
        .expect("optimize");
    assert_eq!(report.outliers_before, 2);
    assert_eq!(report.outliers_after, 0);
    assert_eq!(report.stop_reason, StopReason::TargetReached);
    assert_eq!(output.suppressed_count().expect("count"), 0);
    assert_eq!(output.row(0).expect("row"), vec!["1000", "20"]);

    output.release().expect("release");
    assert!(matches!(
        result.optimize(&mut output, &LocalRecodingConfig::default()),
        Err(AnonymizerError::Handle(HandleError::Orphaned))
    ));
}

#[test]
fn views_serialize_for_collaborators() {
    let data = example();
    let result = Anonymizer::new().anonymize(&data, &k(2)).expect("anonymize");

    let stats = serde_json::to_value(result.statistics()).expect("json");
    assert_eq!(stats["size"], 36);
    assert_eq!(stats["complete"], true);
    assert!(stats["search"]["checks"].as_u64().is_some_and(|c| c > 0));

    let node = result
        .node(&Transformation::new(vec![1, 1, 2]))
        .expect("node");
    let json = serde_json::to_value(&node).expect("json");
    assert_eq!(json["anonymity"], "anonymous");
    assert_eq!(json["checked"], true);
    assert_eq!(json["transformation"], serde_json::json!([1, 1, 2]));
}
