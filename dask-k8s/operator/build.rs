//! Simple build script generating the DaskCluster and DaskWorkerGroup CRD
//! YAML for the helm chart to use
use std::fs::File;

use crds::{CustomResourceExt, DaskCluster, DaskWorkerGroup};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=crds/src");
    generate_crd_yaml()?;
    Ok(())
}

fn generate_crd_yaml() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::path::Path::new("../helm/dask-operator/crds");
    if dir.exists() {
        let writer = File::create(dir.join("DaskCluster.yaml"))?;
        serde_yaml::to_writer(writer, &DaskCluster::crd())?;
        let writer = File::create(dir.join("DaskWorkerGroup.yaml"))?;
        serde_yaml::to_writer(writer, &DaskWorkerGroup::crd())?;
    }

    Ok(())
}
