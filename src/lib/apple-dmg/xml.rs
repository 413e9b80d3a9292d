use {
    crate::BlkxTable,
    anyhow::Result,
    serde::{Deserialize, Serialize},
};

/// The XML property list stored before the koly trailer.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Plist {
    #[serde(rename = "resource-fork")]
    pub resource_fork: ResourceFork,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ResourceFork {
    #[serde(default)]
    pub blkx: Vec<Partition>,
}

impl Plist {
    pub fn partitions(&self) -> &[Partition] {
        &self.resource_fork.blkx
    }

    pub fn add_partition(&mut self, partition: Partition) {
        self.resource_fork.blkx.push(partition);
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Partition {
    #[serde(rename = "Attributes")]
    pub attributes: String,
    #[serde(rename = "CFName")]
    pub cfname: String,
    #[serde(rename = "Data", with = "serde_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

impl Partition {
    pub fn new(id: i32, name: String, table: BlkxTable) -> Self {
        let mut data = Vec::with_capacity(BlkxTable::HEADER_SIZE);
        // Writing into a Vec cannot fail.
        let _ = table.write_to(&mut data);
        Self {
            attributes: "0x0050".into(),
            cfname: name.clone(),
            data,
            id: id.to_string(),
            name,
        }
    }

    pub fn table(&self) -> Result<BlkxTable> {
        BlkxTable::read_from(&mut &self.data[..])
    }
}
