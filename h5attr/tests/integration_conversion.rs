//! Integration tests for numeric conversion between memory and file types.

use h5attr::error::ConversionError;
use h5attr::{Dataspace, Datatype, Endian, File, H5Error, Location};
use tempfile::tempdir;

fn scratch(name: &str) -> (tempfile::TempDir, File) {
    let temp_dir = tempdir().unwrap();
    let file = File::create(temp_dir.path().join(name)).unwrap();
    (temp_dir, file)
}

#[test]
fn test_read_with_wider_and_narrower_types() {
    let (_dir, file) = scratch("widen.h5a");
    let attr = file
        .new_attribute::<i16>("offsets", &Dataspace::simple(&[4]).unwrap())
        .unwrap();
    attr.write(&[-300i16, 0, 12, 300]).unwrap();

    assert_eq!(attr.read::<i64>().unwrap(), vec![-300, 0, 12, 300]);
    assert_eq!(attr.read::<f32>().unwrap(), vec![-300.0, 0.0, 12.0, 300.0]);
    assert!(matches!(
        attr.read::<i8>(),
        Err(H5Error::Conversion(ConversionError::Overflow { .. }))
    ));
    assert!(matches!(
        attr.read::<u16>(),
        Err(H5Error::Conversion(ConversionError::Overflow { .. }))
    ));
}

#[test]
fn test_write_converts_to_file_type() {
    let (_dir, file) = scratch("narrow.h5a");
    let attr = file
        .new_attribute::<u8>("levels", &Dataspace::simple(&[3]).unwrap())
        .unwrap();
    attr.write(&[1.9f64, 200.0, 0.0]).unwrap();
    assert_eq!(attr.read::<u8>().unwrap(), vec![1, 200, 0]);

    let err = attr.write(&[1u32, 2, 256]).unwrap_err();
    assert!(matches!(err, H5Error::Conversion(ConversionError::Overflow { .. })));
    // The rejected write did not modify the stored value.
    assert_eq!(attr.read::<u8>().unwrap(), vec![1, 200, 0]);
}

#[test]
fn test_big_endian_file_type_round_trips() {
    let (_dir, file) = scratch("be.h5a");
    let be = Datatype::Integer {
        size: 4,
        order: Endian::Big,
        signed: true,
    };
    let attr = file.create_attribute("be", &be, &Dataspace::scalar()).unwrap();
    attr.write_scalar(0x0102_0304i32).unwrap();
    assert_eq!(attr.read_raw(&be).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(attr.read_scalar::<i32>().unwrap(), 0x0102_0304);

    let be_f64 = Datatype::Float {
        size: 8,
        order: Endian::Big,
    };
    let attr = file.create_attribute("bef", &be_f64, &Dataspace::scalar()).unwrap();
    attr.write_scalar(2.5f32).unwrap();
    assert_eq!(attr.read_raw(&be_f64).unwrap(), 2.5f64.to_be_bytes().to_vec());
    assert_eq!(attr.read_scalar::<f64>().unwrap(), 2.5);
}

#[test]
fn test_raw_buffer_length_checked() {
    let (_dir, file) = scratch("raw.h5a");
    let attr = file
        .new_attribute::<u32>("raw", &Dataspace::simple(&[2]).unwrap())
        .unwrap();
    let err = attr
        .write_raw(&Datatype::native::<u32>(), &[0u8; 4])
        .unwrap_err();
    assert!(matches!(
        err,
        H5Error::Conversion(ConversionError::BufferSize { expected: 8, found: 4 })
    ));

    let err = attr.write(&[1u32, 2, 3]).unwrap_err();
    assert!(matches!(
        err,
        H5Error::Conversion(ConversionError::ElementCount { expected: 2, found: 3 })
    ));
}

#[test]
fn test_read_2d_rows() {
    let (_dir, file) = scratch("grid.h5a");
    let attr = file
        .new_attribute::<i32>("grid", &Dataspace::simple(&[2, 3]).unwrap())
        .unwrap();
    attr.write(&[1, 2, 3, 4, 5, 6]).unwrap();
    assert_eq!(
        attr.read_2d::<i32>().unwrap(),
        vec![vec![1, 2, 3], vec![4, 5, 6]]
    );
}

#[test]
fn test_null_and_empty_dataspaces() {
    let (_dir, file) = scratch("empty.h5a");
    let null = file.new_attribute::<f64>("null", &Dataspace::null()).unwrap();
    assert_eq!(null.num_elements().unwrap(), 0);
    assert!(null.read::<f64>().unwrap().is_empty());
    null.write::<f64>(&[]).unwrap();

    let empty = file
        .new_attribute::<u8>("empty", &Dataspace::simple(&[0, 4]).unwrap())
        .unwrap();
    assert!(empty.read_2d::<u8>().unwrap().is_empty());
}

#[test]
fn test_numeric_attribute_rejects_string_io() {
    let (_dir, file) = scratch("mixed.h5a");
    let attr = file.new_attribute::<i32>("n", &Dataspace::scalar()).unwrap();
    assert!(matches!(
        attr.read_string(),
        Err(H5Error::Conversion(ConversionError::Unsupported { .. }))
    ));
    assert!(matches!(
        attr.write_string("1"),
        Err(H5Error::Conversion(ConversionError::Unsupported { .. }))
    ));
}
