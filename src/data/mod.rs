use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Data, Int, Tensor},
};
use derive_new::new;
use itertools::Itertools;

use self::nyudv2::NyudItem;

pub mod nyudv2;
pub mod transform;

#[derive(new)]
pub struct NyudBatcher<B: Backend> {
    device: B::Device,
}

#[derive(Debug, Clone)]
pub struct NyudBatch<B: Backend> {
    /// N x C x H x W, normalized.
    pub image: Tensor<B, 4>,
    /// N x H x W dense class indices, with 255 as the ignore sentinel.
    pub label: Tensor<B, 3, Int>,
}

impl<B: Backend> Batcher<NyudItem, NyudBatch<B>> for NyudBatcher<B> {
    fn batch(&self, items: Vec<NyudItem>) -> NyudBatch<B> {
        let image = items
            .iter()
            .map(|item| {
                Data::<f32, 3>::new(item.image.clone(), [item.height, item.width, 3].into())
            })
            .map(|data| Tensor::<B, 3>::from_data(data.convert(), &self.device))
            .map(|tensor|
                 // H x W x C -> C x W x H
                 tensor.swap_dims(0, 2)
                 // C x W x H -> C x H x W
                 .transpose())
            .collect_vec();

        let label = items
            .iter()
            .map(|item| Data::<i64, 2>::new(item.label.clone(), [item.height, item.width].into()))
            .map(|data| Tensor::<B, 2, Int>::from_data(data.convert(), &self.device))
            .collect_vec();

        let image = Tensor::stack(image, 0).to_device(&self.device);
        let label = Tensor::stack(label, 0).to_device(&self.device);

        NyudBatch { image, label }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type B = burn::backend::NdArray;

    fn item(value: f32, height: usize, width: usize) -> NyudItem {
        NyudItem {
            image: vec![value; height * width * 3],
            label: vec![0; height * width],
            height,
            width,
        }
    }

    #[test]
    fn batch_is_nchw() {
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let batcher = NyudBatcher::<B>::new(device);

        let batch = batcher.batch(vec![item(0.1, 4, 6), item(0.2, 4, 6)]);

        assert_eq!(batch.image.dims(), [2, 3, 4, 6]);
        assert_eq!(batch.label.dims(), [2, 4, 6]);
    }
}
