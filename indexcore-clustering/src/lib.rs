mod worker;

pub use worker::ClusteringWorker;
