use ndarray::Array2;
use std::path::Path;
use std::sync::Arc;
use zarrs::array::{data_type, Array, ArrayBuilder};
use zarrs::config::MetadataRetrieveVersion;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::GroupBuilder;
use zarrs::storage::ReadableWritableListableStorageTraits;

use crate::plane::Plane;

pub type Store = Arc<FilesystemStore>;

pub type StoreArray = Array<dyn ReadableWritableListableStorageTraits>;

type Attrs = Option<serde_json::Map<String, serde_json::Value>>;

pub fn open_store(root: &Path) -> Result<Store, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(root)?;
    let store = FilesystemStore::new(root)?;
    Ok(Arc::new(store))
}

/// Open a Zarr v3 array. Rejects v2 data.
pub fn open_array(store: &Store, path: &str) -> Result<StoreArray, Box<dyn std::error::Error>> {
    let store_trait: Arc<dyn ReadableWritableListableStorageTraits> = store.clone();
    let array = Array::open_opt(store_trait, path, &MetadataRetrieveVersion::V3)?;
    Ok(array)
}

/// Create the root group and every group along `path` (e.g. `/region/r1/montage`).
pub fn ensure_groups(store: &Store, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store_trait: Arc<dyn ReadableWritableListableStorageTraits> = store.clone();
    GroupBuilder::new().build(store_trait.clone(), "/")?.store_metadata()?;
    let mut prefix = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        prefix.push('/');
        prefix.push_str(part);
        GroupBuilder::new()
            .build(store_trait.clone(), &prefix)?
            .store_metadata()?;
    }
    Ok(())
}

/// Rewrite the metadata of the group at `path` with `attrs`.
pub fn write_group_attrs(store: &Store, path: &str, attrs: Attrs) -> Result<(), Box<dyn std::error::Error>> {
    let store_trait: Arc<dyn ReadableWritableListableStorageTraits> = store.clone();
    let mut builder = GroupBuilder::new();
    if let Some(a) = attrs {
        builder.attributes(a);
    }
    builder.build(store_trait, path)?.store_metadata()?;
    Ok(())
}

/// A 2D plane stored as one `(y, x)` chunk.
pub fn write_plane_f32(
    store: &Store,
    path: &str,
    plane: &Plane,
    attrs: Attrs,
) -> Result<(), Box<dyn std::error::Error>> {
    let (h, w) = plane.dim();
    let shape = vec![h as u64, w as u64];
    let store_trait: Arc<dyn ReadableWritableListableStorageTraits> = store.clone();
    let mut builder = ArrayBuilder::new(shape.clone(), shape, data_type::float32(), 0.0f32);
    if let Some(a) = attrs {
        builder.attributes(a);
    }
    let array = builder.build(store_trait, path)?;
    array.store_metadata()?;
    let data: Vec<f32> = plane.iter().copied().collect();
    array.store_chunk(&[0, 0], data.as_slice())?;
    Ok(())
}

pub fn write_labels_u32(
    store: &Store,
    path: &str,
    labels: &Array2<u32>,
    attrs: Attrs,
) -> Result<(), Box<dyn std::error::Error>> {
    let (h, w) = labels.dim();
    let shape = vec![h as u64, w as u64];
    let store_trait: Arc<dyn ReadableWritableListableStorageTraits> = store.clone();
    let mut builder = ArrayBuilder::new(shape.clone(), shape, data_type::uint32(), 0u32);
    if let Some(a) = attrs {
        builder.attributes(a);
    }
    let array = builder.build(store_trait, path)?;
    array.store_metadata()?;
    let data: Vec<u32> = labels.iter().copied().collect();
    array.store_chunk(&[0, 0], data.as_slice())?;
    Ok(())
}

fn plane_shape(array: &StoreArray) -> Result<(usize, usize), Box<dyn std::error::Error>> {
    match array.shape() {
        [h, w] => Ok((*h as usize, *w as usize)),
        other => Err(format!("expected a 2D array, found shape {:?}", other).into()),
    }
}

pub fn read_plane_f32(store: &Store, path: &str) -> Result<Plane, Box<dyn std::error::Error>> {
    let array = open_array(store, path)?;
    let shape = plane_shape(&array)?;
    let data = array.retrieve_chunk::<Vec<f32>>(&[0, 0])?;
    Ok(Array2::from_shape_vec(shape, data)?)
}

pub fn read_labels_u32(store: &Store, path: &str) -> Result<Array2<u32>, Box<dyn std::error::Error>> {
    let array = open_array(store, path)?;
    let shape = plane_shape(&array)?;
    let data = array.retrieve_chunk::<Vec<u32>>(&[0, 0])?;
    Ok(Array2::from_shape_vec(shape, data)?)
}
