mod common;

use assert_matches::assert_matches;
use num_complex::Complex64;

use morb_fetch::dataset::{DatasetKind, Elements, Storage, validate};
use morb_fetch::error::MorbError;
use morb_fetch::mat::{parse_mat, read_mat_file};

use common::{MatBuilder, steel_profile_mat};

fn with_fields(names: &[&str]) -> MatBuilder {
    names
        .iter()
        .fold(MatBuilder::new(), |builder, name| builder.dense(name, 2, 2, &[1.0, 2.0, 3.0, 4.0]))
}

#[test]
fn classification_order_is_a_contract() {
    let cases: [(&[&str], DatasetKind); 7] = [
        (&["A", "B", "C"], DatasetKind::Abc),
        (&["A", "B", "C", "D"], DatasetKind::Abc),
        (&["A", "B", "C", "E"], DatasetKind::Abce),
        (&["A", "B", "C", "D", "E"], DatasetKind::Abcde),
        (&["B", "C", "K", "M"], DatasetKind::Bckm),
        (&["B", "C", "E", "K", "M"], DatasetKind::Bcekm),
        (&["A", "B", "C", "E", "K", "M"], DatasetKind::Bcekm),
    ];
    for (names, kind) in cases {
        let payload = parse_mat(&with_fields(names).build()).unwrap();
        assert_eq!(validate(&payload).unwrap().kind(), kind, "fields {names:?}");
    }
}

#[test]
fn compressed_and_plain_files_decode_identically() {
    let build = |builder: MatBuilder| {
        builder
            .dense("A", 2, 1, &[0.25, -1.5])
            .int32("B", 1, 2, &[-3, 7])
            .complex("C", 1, 1, &[1.0], &[2.0])
            .sparse("E", 2, 2, &[0, 1, 1], &[1], &[9.0])
            .text("note", "ignored")
            .build()
    };
    let plain = parse_mat(&build(MatBuilder::new())).unwrap();
    let compressed = parse_mat(&build(MatBuilder::new().compressed())).unwrap();
    assert_eq!(plain, compressed);
    assert_eq!(plain.len(), 5);

    let dataset = validate(&compressed).unwrap();
    assert_eq!(dataset.kind(), DatasetKind::Abce);
    assert_eq!(
        dataset.field("B").unwrap().elements(),
        &Elements::Int64(vec![-3, 7])
    );
    assert_eq!(
        dataset.field("C").unwrap().elements(),
        &Elements::Complex128(vec![Complex64::new(1.0, 2.0)])
    );
    assert_matches!(
        dataset.field("E").unwrap().storage(),
        Storage::Sparse { col_ptr, row_indices, values: Elements::Float64(values) }
            if col_ptr == &vec![0, 1, 1] && row_indices == &vec![1] && values == &vec![9.0]
    );
}

#[test]
fn char_field_required_by_variant_is_rejected() {
    let payload = parse_mat(
        &MatBuilder::new()
            .dense("B", 1, 1, &[1.0])
            .dense("C", 1, 1, &[1.0])
            .dense("K", 1, 1, &[1.0])
            .text("M", "mass")
            .build(),
    )
    .unwrap();
    assert_matches!(
        validate(&payload),
        Err(MorbError::UnsupportedElementKind { field, kind }) if field == "M" && kind == "char"
    );
}

#[test]
fn reads_fixture_from_disk() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("steel.mat");
    std::fs::write(&path, steel_profile_mat()).unwrap();

    let payload = read_mat_file(&path).unwrap();
    assert_eq!(
        payload.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["A", "B", "C", "E", "description"]
    );
    let dataset = validate(&payload).unwrap();
    let a = dataset.field("A").unwrap();
    assert!(a.is_sparse());
    assert_eq!(a.nnz(), 3);

    assert!(read_mat_file(&temp.path().join("missing.mat")).is_err());
}
